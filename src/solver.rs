//! XPBD (Extended Position Based Dynamics) Solver
//!
//! Substepped rigid-body solver after Müller et al., "Detailed Rigid Body
//! Simulation with Extended Position Based Dynamics" (2020).
//!
//! # Substep
//!
//! 1. Integrate: `v += h * a`, damping, `x += h * v`, `q += h/2 * [w,0] q`
//! 2. Position solve: contacts (normal + static friction) and joints,
//!    `iterations` Gauss-Seidel sweeps
//! 3. Derive velocities from the position change
//! 4. Velocity solve: restitution, dynamic friction, joint damping
//!
//! The solver works on a dense snapshot of the bodies taken by the
//! environment once per step; results are written back afterwards.
//!
//! # Optional Parallelism
//!
//! With the `parallel` feature, integration and velocity derivation run over
//! bodies with Rayon. Constraint sweeps stay sequential and deterministic.

use crate::body::BodyHandle;
use crate::config::SolverConfig;
use crate::joint::Joint;
use crate::math::{angular_velocity_between, integrate_rotation, DQuat, DVec3, Pose, EPSILON};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

// ============================================================================
// Solver body
// ============================================================================

/// Per-step body snapshot in mass-frame coordinates
#[derive(Clone, Copy, Debug)]
pub struct SolverBody {
    /// Body this snapshot belongs to
    pub handle: BodyHandle,
    /// Center of mass (world)
    pub x: DVec3,
    /// Orientation
    pub q: DQuat,
    /// Center of mass at the start of the substep
    pub x_prev: DVec3,
    /// Orientation at the start of the substep
    pub q_prev: DQuat,
    /// Linear velocity
    pub v: DVec3,
    /// Angular velocity (world)
    pub w: DVec3,
    /// Inverse mass (0 = static)
    pub inv_mass: f64,
    /// Principal inverse inertia (body axes, 0 = static)
    pub inv_inertia: DVec3,
    /// External force for this step (world)
    pub force: DVec3,
    /// External torque for this step (world)
    pub torque: DVec3,
    /// 1 when gravity applies, 0 otherwise
    pub gravity_scale: f64,
    /// Linear damping (1/s)
    pub linear_damping: f64,
    /// Angular damping (1/s)
    pub angular_damping: f64,
}

impl SolverBody {
    /// Static snapshot at `frame`
    pub fn fixed(handle: BodyHandle, frame: Pose) -> Self {
        Self {
            handle,
            x: frame.position,
            q: frame.rotation,
            x_prev: frame.position,
            q_prev: frame.rotation,
            v: DVec3::ZERO,
            w: DVec3::ZERO,
            inv_mass: 0.0,
            inv_inertia: DVec3::ZERO,
            force: DVec3::ZERO,
            torque: DVec3::ZERO,
            gravity_scale: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
        }
    }

    /// True when the solver may move this body
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.inv_mass > 0.0
    }

    /// Mass frame (center of mass + orientation)
    #[inline]
    pub fn frame(&self) -> Pose {
        Pose {
            position: self.x,
            rotation: self.q,
        }
    }

    /// Mass frame at the start of the substep
    #[inline]
    pub fn prev_frame(&self) -> Pose {
        Pose {
            position: self.x_prev,
            rotation: self.q_prev,
        }
    }

    /// World inverse inertia applied to `v`
    #[inline]
    pub fn inv_inertia_mul(&self, v: DVec3) -> DVec3 {
        if !self.is_dynamic() {
            return DVec3::ZERO;
        }
        self.q * (self.inv_inertia * (self.q.inverse() * v))
    }

    /// Generalized inverse mass for a correction along `n` at offset `r`
    #[inline]
    fn generalized_inv_mass(&self, r: DVec3, n: DVec3) -> f64 {
        if !self.is_dynamic() {
            return 0.0;
        }
        let rn = r.cross(n);
        self.inv_mass + rn.dot(self.inv_inertia_mul(rn))
    }

    /// Generalized inverse mass of a pure rotation about `n`
    #[inline]
    fn angular_inv_mass(&self, n: DVec3) -> f64 {
        n.dot(self.inv_inertia_mul(n))
    }

    /// Velocity of the world point `p`
    #[inline]
    pub fn point_velocity(&self, p: DVec3) -> DVec3 {
        self.v + self.w.cross(p - self.x)
    }
}

// ============================================================================
// Constraint primitives
// ============================================================================

/// Apply a positional correction between two points
///
/// `correction` is the displacement A's point should undergo relative to B's
/// point. Returns the Lagrange multiplier increment (always >= 0).
#[allow(clippy::too_many_arguments)]
pub fn apply_positional(
    bodies: &mut [SolverBody],
    a: Option<usize>,
    b: Option<usize>,
    point_a: DVec3,
    point_b: DVec3,
    correction: DVec3,
    compliance: f64,
    h: f64,
) -> f64 {
    let c = correction.length();
    if c < EPSILON {
        return 0.0;
    }
    let n = correction / c;
    let ra = a.map(|i| point_a - bodies[i].x);
    let rb = b.map(|i| point_b - bodies[i].x);
    let wa = a.zip(ra).map_or(0.0, |(i, r)| bodies[i].generalized_inv_mass(r, n));
    let wb = b.zip(rb).map_or(0.0, |(i, r)| bodies[i].generalized_inv_mass(r, n));
    let denom = wa + wb + compliance / (h * h);
    if denom < EPSILON {
        return 0.0;
    }
    let dlambda = c / denom;
    let p = n * dlambda;
    if let (Some(i), Some(r)) = (a, ra) {
        let body = &mut bodies[i];
        if body.is_dynamic() {
            body.x += p * body.inv_mass;
            let dq = body.inv_inertia_mul(r.cross(p));
            body.q = integrate_rotation(body.q, dq, 1.0);
        }
    }
    if let (Some(i), Some(r)) = (b, rb) {
        let body = &mut bodies[i];
        if body.is_dynamic() {
            body.x -= p * body.inv_mass;
            let dq = body.inv_inertia_mul(r.cross(p));
            body.q = integrate_rotation(body.q, -dq, 1.0);
        }
    }
    dlambda
}

/// Apply a rotational correction
///
/// `correction` is the rotation vector A should undergo relative to B.
pub fn apply_angular(
    bodies: &mut [SolverBody],
    a: Option<usize>,
    b: Option<usize>,
    correction: DVec3,
    compliance: f64,
    h: f64,
) -> f64 {
    let theta = correction.length();
    if theta < EPSILON {
        return 0.0;
    }
    let n = correction / theta;
    let wa = a.map_or(0.0, |i| bodies[i].angular_inv_mass(n));
    let wb = b.map_or(0.0, |i| bodies[i].angular_inv_mass(n));
    let denom = wa + wb + compliance / (h * h);
    if denom < EPSILON {
        return 0.0;
    }
    let dlambda = theta / denom;
    let p = n * dlambda;
    if let Some(i) = a {
        let body = &mut bodies[i];
        if body.is_dynamic() {
            let dq = body.inv_inertia_mul(p);
            body.q = integrate_rotation(body.q, dq, 1.0);
        }
    }
    if let Some(i) = b {
        let body = &mut bodies[i];
        if body.is_dynamic() {
            let dq = body.inv_inertia_mul(p);
            body.q = integrate_rotation(body.q, -dq, 1.0);
        }
    }
    dlambda
}

/// Change the relative velocity of two points by `dv` with one impulse
pub fn apply_velocity_impulse(
    bodies: &mut [SolverBody],
    a: Option<usize>,
    b: Option<usize>,
    point_a: DVec3,
    point_b: DVec3,
    dv: DVec3,
) {
    let mag = dv.length();
    if mag < EPSILON {
        return;
    }
    let n = dv / mag;
    let ra = a.map(|i| point_a - bodies[i].x);
    let rb = b.map(|i| point_b - bodies[i].x);
    let wa = a.zip(ra).map_or(0.0, |(i, r)| bodies[i].generalized_inv_mass(r, n));
    let wb = b.zip(rb).map_or(0.0, |(i, r)| bodies[i].generalized_inv_mass(r, n));
    if wa + wb < EPSILON {
        return;
    }
    let p = dv / (wa + wb);
    if let (Some(i), Some(r)) = (a, ra) {
        let body = &mut bodies[i];
        if body.is_dynamic() {
            body.v += p * body.inv_mass;
            body.w += body.inv_inertia_mul(r.cross(p));
        }
    }
    if let (Some(i), Some(r)) = (b, rb) {
        let body = &mut bodies[i];
        if body.is_dynamic() {
            body.v -= p * body.inv_mass;
            body.w -= body.inv_inertia_mul(r.cross(p));
        }
    }
}

/// Change the relative angular velocity `w_a - w_b` by `dw`
pub fn apply_angular_impulse(bodies: &mut [SolverBody], a: Option<usize>, b: Option<usize>, dw: DVec3) {
    let mag = dw.length();
    if mag < EPSILON {
        return;
    }
    let n = dw / mag;
    let wa = a.map_or(0.0, |i| bodies[i].angular_inv_mass(n));
    let wb = b.map_or(0.0, |i| bodies[i].angular_inv_mass(n));
    if wa + wb < EPSILON {
        return;
    }
    let p = dw / (wa + wb);
    if let Some(i) = a {
        let dw_a = bodies[i].inv_inertia_mul(p);
        bodies[i].w += dw_a;
    }
    if let Some(i) = b {
        let dw_b = bodies[i].inv_inertia_mul(p);
        bodies[i].w -= dw_b;
    }
}

// ============================================================================
// Contacts
// ============================================================================

/// Contact point between two solver bodies
#[derive(Clone, Copy, Debug)]
pub struct SolverContact {
    /// Index of body A
    pub a: usize,
    /// Index of body B
    pub b: usize,
    /// Anchor on A (mass frame)
    pub local_a: DVec3,
    /// Anchor on B (mass frame)
    pub local_b: DVec3,
    /// Normal (world, A -> B)
    pub normal: DVec3,
    /// Combined friction coefficient
    pub friction: f64,
    /// Combined restitution coefficient
    pub restitution: f64,
    /// Normal multiplier of the current substep
    pub lambda_n: f64,
    /// Largest normal multiplier seen during the step
    pub max_lambda_n: f64,
    /// Approach speed before the position solve (positive = approaching)
    pub approach_speed: f64,
}

impl SolverContact {
    fn world_points(&self, bodies: &[SolverBody]) -> (DVec3, DVec3) {
        (
            bodies[self.a].frame().transform_point(self.local_a),
            bodies[self.b].frame().transform_point(self.local_b),
        )
    }

    fn relative_velocity(&self, bodies: &[SolverBody]) -> DVec3 {
        let (pa, pb) = self.world_points(bodies);
        bodies[self.a].point_velocity(pa) - bodies[self.b].point_velocity(pb)
    }
}

// ============================================================================
// Solver
// ============================================================================

/// Joint bound to dense body indices for one step
#[derive(Clone, Copy, Debug)]
pub struct JointRef<'a> {
    /// Joint definition
    pub joint: &'a Joint,
    /// Dense index of body A
    pub a: Option<usize>,
    /// Dense index of body B (`None` = world)
    pub b: Option<usize>,
}

/// XPBD solver state for one step
#[derive(Clone, Debug, Default)]
pub struct Solver {
    /// Configuration
    pub config: SolverConfig,
    /// Dense body snapshot
    pub bodies: Vec<SolverBody>,
    /// Contacts of this step
    pub contacts: Vec<SolverContact>,
}

impl Solver {
    /// Create a solver with `config`
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            bodies: Vec::new(),
            contacts: Vec::new(),
        }
    }

    /// Drop the previous snapshot
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.contacts.clear();
    }

    /// Advance the snapshot by `dt`
    pub fn step(&mut self, joints: &[JointRef<'_>], gravity: DVec3, dt: f64) {
        if dt <= 0.0 || !dt.is_finite() {
            return;
        }
        let substeps = self.config.substeps.max(1);
        let h = dt / substeps as f64;
        for c in &mut self.contacts {
            c.max_lambda_n = 0.0;
        }
        for _ in 0..substeps {
            self.substep(joints, gravity, h);
        }
    }

    fn substep(&mut self, joints: &[JointRef<'_>], gravity: DVec3, h: f64) {
        self.integrate_positions(gravity, h);

        for i in 0..self.contacts.len() {
            let c = self.contacts[i];
            let approach = c.relative_velocity(&self.bodies).dot(c.normal);
            self.contacts[i].approach_speed = approach;
            self.contacts[i].lambda_n = 0.0;
        }

        for _ in 0..self.config.iterations.max(1) {
            self.solve_contact_positions(h);
            for j in joints {
                j.joint.solve_position(&mut self.bodies, j.a, j.b, h);
            }
        }

        self.update_velocities(h);

        self.solve_contact_velocities(gravity, h);
        for j in joints {
            j.joint.solve_velocity(&mut self.bodies, j.a, j.b, h);
        }
    }

    /// Integrate positions
    #[inline]
    fn integrate_positions(&mut self, gravity: DVec3, h: f64) {
        #[cfg(feature = "parallel")]
        {
            self.bodies
                .par_iter_mut()
                .for_each(|body| integrate_body(body, gravity, h));
        }

        #[cfg(not(feature = "parallel"))]
        {
            for body in &mut self.bodies {
                integrate_body(body, gravity, h);
            }
        }
    }

    /// Update velocities from position changes
    #[inline]
    fn update_velocities(&mut self, h: f64) {
        #[cfg(feature = "parallel")]
        {
            self.bodies
                .par_iter_mut()
                .for_each(|body| derive_velocity(body, h));
        }

        #[cfg(not(feature = "parallel"))]
        {
            for body in &mut self.bodies {
                derive_velocity(body, h);
            }
        }
    }

    fn solve_contact_positions(&mut self, h: f64) {
        let compliance = self.config.contact_compliance;
        for i in 0..self.contacts.len() {
            let c = self.contacts[i];
            let (pa, pb) = c.world_points(&self.bodies);
            let depth = (pa - pb).dot(c.normal);
            if depth <= 0.0 {
                continue;
            }
            let dlambda = apply_positional(
                &mut self.bodies,
                Some(c.a),
                Some(c.b),
                pa,
                pb,
                -c.normal * depth,
                compliance,
                h,
            );
            let lambda_n = c.lambda_n + dlambda;
            self.contacts[i].lambda_n = lambda_n;
            self.contacts[i].max_lambda_n = c.max_lambda_n.max(lambda_n);

            // Static friction: undo tangential slip of the contact points
            if c.friction <= 0.0 {
                continue;
            }
            let (pa, pb) = c.world_points(&self.bodies);
            let (a, b) = (&self.bodies[c.a], &self.bodies[c.b]);
            let pa_prev = a.prev_frame().transform_point(c.local_a);
            let pb_prev = b.prev_frame().transform_point(c.local_b);
            let slip = (pa - pa_prev) - (pb - pb_prev);
            let slip_t = slip - c.normal * slip.dot(c.normal);
            let len = slip_t.length();
            if len < EPSILON {
                continue;
            }
            let t = slip_t / len;
            let w = a.generalized_inv_mass(pa - a.x, t) + b.generalized_inv_mass(pb - b.x, t);
            if w < EPSILON {
                continue;
            }
            let lambda_t = len / w;
            if lambda_t < c.friction * lambda_n {
                apply_positional(&mut self.bodies, Some(c.a), Some(c.b), pa, pb, -slip_t, 0.0, h);
            }
        }
    }

    fn solve_contact_velocities(&mut self, gravity: DVec3, h: f64) {
        let bounce_threshold = 2.0 * gravity.length() * h;
        for i in 0..self.contacts.len() {
            let c = self.contacts[i];
            if c.lambda_n <= 0.0 {
                continue;
            }
            let (pa, pb) = c.world_points(&self.bodies);
            let v_rel = c.relative_velocity(&self.bodies);
            // Separation direction: from B toward A
            let n = -c.normal;
            let vn = v_rel.dot(n);
            let vt = v_rel - n * vn;
            let mut dv = DVec3::ZERO;

            let vt_len = vt.length();
            if vt_len > EPSILON && c.friction > 0.0 {
                let normal_force = c.lambda_n / (h * h);
                dv -= vt / vt_len * (h * c.friction * normal_force).min(vt_len);
            }

            let vn_pre = -c.approach_speed;
            let e = if vn_pre.abs() <= bounce_threshold {
                0.0
            } else {
                c.restitution
            };
            dv += n * (-vn + (-e * vn_pre).max(0.0));

            apply_velocity_impulse(&mut self.bodies, Some(c.a), Some(c.b), pa, pb, dv);
        }
    }
}

fn integrate_body(body: &mut SolverBody, gravity: DVec3, h: f64) {
    body.x_prev = body.x;
    body.q_prev = body.q;
    if !body.is_dynamic() {
        return;
    }
    body.v += (gravity * body.gravity_scale + body.force * body.inv_mass) * h;
    body.w += body.inv_inertia_mul(body.torque) * h;
    body.v *= 1.0 / (1.0 + body.linear_damping * h);
    body.w *= 1.0 / (1.0 + body.angular_damping * h);
    body.x += body.v * h;
    body.q = integrate_rotation(body.q, body.w, h);
}

fn derive_velocity(body: &mut SolverBody, h: f64) {
    if !body.is_dynamic() {
        return;
    }
    body.v = (body.x - body.x_prev) / h;
    body.w = angular_velocity_between(body.q_prev, body.q, h);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn handle(i: u32) -> BodyHandle {
        BodyHandle::from_bits(u64::from(i))
    }

    fn dynamic(i: u32, x: DVec3) -> SolverBody {
        SolverBody {
            inv_mass: 1.0,
            inv_inertia: DVec3::splat(2.5),
            gravity_scale: 1.0,
            ..SolverBody::fixed(handle(i), Pose::new(x, DQuat::IDENTITY))
        }
    }

    #[test]
    fn test_free_fall() {
        let mut solver = Solver::new(SolverConfig::default());
        solver.bodies.push(dynamic(0, DVec3::ZERO));
        let g = DVec3::new(0.0, -10.0, 0.0);
        for _ in 0..60 {
            solver.step(&[], g, 1.0 / 60.0);
        }
        assert_relative_eq!(solver.bodies[0].v.y, -10.0, epsilon = 1e-6);
        // Semi-implicit Euler lands slightly below the analytic -5
        assert!(solver.bodies[0].x.y < -4.9 && solver.bodies[0].x.y > -5.2);
    }

    #[test]
    fn test_static_body_untouched() {
        let mut solver = Solver::new(SolverConfig::default());
        let mut body = SolverBody::fixed(handle(0), Pose::IDENTITY);
        body.force = DVec3::new(100.0, 0.0, 0.0);
        solver.bodies.push(body);
        solver.step(&[], DVec3::new(0.0, -10.0, 0.0), 0.1);
        assert_eq!(solver.bodies[0].x, DVec3::ZERO);
        assert_eq!(solver.bodies[0].v, DVec3::ZERO);
    }

    #[test]
    fn test_positional_correction_splits_by_mass() {
        let mut bodies = vec![dynamic(0, DVec3::ZERO), dynamic(1, DVec3::X)];
        bodies[1].inv_mass = 3.0;
        let dl = apply_positional(
            &mut bodies,
            Some(0),
            Some(1),
            DVec3::ZERO,
            DVec3::X,
            DVec3::new(0.4, 0.0, 0.0),
            0.0,
            0.01,
        );
        assert_relative_eq!(dl, 0.1, epsilon = 1e-12);
        assert_relative_eq!(bodies[0].x.x, 0.1, epsilon = 1e-12);
        assert_relative_eq!(bodies[1].x.x, 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_ball_rests_on_static_ground() {
        let mut solver = Solver::new(SolverConfig::default());
        let ground = SolverBody::fixed(handle(0), Pose::IDENTITY);
        let ball = dynamic(1, DVec3::new(0.0, 0.5, 0.0));
        solver.bodies.push(ground);
        solver.bodies.push(ball);
        let g = DVec3::new(0.0, -9.81, 0.0);
        for _ in 0..120 {
            // Ball of radius 0.5 touching the plane y = 0 below its center
            solver.contacts = vec![SolverContact {
                a: 1,
                b: 0,
                local_a: DVec3::new(0.0, -0.5, 0.0),
                local_b: DVec3::new(solver.bodies[1].x.x, 0.0, solver.bodies[1].x.z),
                normal: DVec3::NEG_Y,
                friction: 0.5,
                restitution: 0.0,
                lambda_n: 0.0,
                max_lambda_n: 0.0,
                approach_speed: 0.0,
            }];
            solver.step(&[], g, 1.0 / 60.0);
        }
        assert!((solver.bodies[1].x.y - 0.5).abs() < 1e-3);
        assert!(solver.bodies[1].v.length() < 1e-2);
    }

    #[test]
    fn test_restitution_bounces() {
        let mut solver = Solver::new(SolverConfig::default());
        solver.bodies.push(SolverBody::fixed(handle(0), Pose::IDENTITY));
        let mut ball = dynamic(1, DVec3::new(0.0, 0.5, 0.0));
        ball.v = DVec3::new(0.0, -5.0, 0.0);
        ball.gravity_scale = 0.0;
        solver.bodies.push(ball);
        solver.contacts = vec![SolverContact {
            a: 1,
            b: 0,
            local_a: DVec3::new(0.0, -0.5, 0.0),
            local_b: DVec3::ZERO,
            normal: DVec3::NEG_Y,
            friction: 0.0,
            restitution: 1.0,
            lambda_n: 0.0,
            max_lambda_n: 0.0,
            approach_speed: 0.0,
        }];
        solver.step(&[], DVec3::ZERO, 1.0 / 60.0);
        assert!(solver.bodies[1].v.y > 4.0, "ball should bounce, v = {:?}", solver.bodies[1].v);
    }
}
