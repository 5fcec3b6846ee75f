//! Physics Event System
//!
//! Listener traits, per-body listener registry and the queue of events
//! collected during a step.
//!
//! # Delivery
//!
//! Events are queued while a step runs and delivered by [`ListenerRegistry::dispatch`]
//! once the step has committed its state. Every listener call is isolated
//! with `catch_unwind`: a panicking listener is logged and the remaining
//! events are still delivered.
//!
//! # Throttling
//!
//! A collision listener is silenced for `collision_call_sleep` seconds of
//! simulated time after each call.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::body::BodyHandle;
use crate::math::DVec3;

// ============================================================================
// Events
// ============================================================================

/// Body reference handed to listeners
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventBody {
    /// Body handle
    pub handle: BodyHandle,
    /// Host value stored on the body
    pub user_data: usize,
}

/// New impact of a body against another
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionEvent {
    /// Listening body
    pub body: EventBody,
    /// Body it hit
    pub other: EventBody,
    /// Contact point (world)
    pub point: DVec3,
    /// Approach speed along the normal
    pub speed: f64,
    /// Surface normal pointing toward the listening body
    pub normal: DVec3,
}

/// Start or end of a persistent contact pair
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrictionEvent {
    /// `true` when the pair starts touching
    pub created: bool,
    /// Listening body
    pub body: EventBody,
    /// Other body of the pair
    pub other: EventBody,
    /// Stable id of the pair
    pub friction_id: u32,
    /// Contact point (world)
    pub point: DVec3,
    /// Relative speed of the bodies at the point
    pub speed: f64,
    /// Surface normal pointing toward the listening body
    pub normal: DVec3,
}

/// Kind of a contract notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ContractKind {
    /// Speed-windowed impact trigger
    Collision = 0,
    /// Debounced touching state
    Contact = 1,
}

/// Notification raised by a detection helper
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContractEvent {
    /// Body owning the helper
    pub body: EventBody,
    /// Classification the helper watches
    pub col_id: i32,
    /// Helper kind
    pub kind: ContractKind,
    /// Impact speed within the window, in `[0, 1]` (1 for contacts)
    pub speed_percent: f64,
    /// Contact started (`true`) or ended
    pub is_on: bool,
}

/// Phantom overlap transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhantomEvent {
    /// `true` on enter
    pub entered: bool,
    /// Phantom volume
    pub phantom: EventBody,
    /// Body entering or leaving
    pub other: EventBody,
}

/// Queued event
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PhysicsEvent {
    /// Collision listener call
    Collision(CollisionEvent),
    /// Friction listener call
    Friction(FrictionEvent),
    /// Contract listener call
    Contract(ContractEvent),
    /// Phantom listener call
    Phantom(PhantomEvent),
}

impl PhysicsEvent {
    /// Body whose listener receives the event
    pub fn target(&self) -> BodyHandle {
        match self {
            Self::Collision(e) => e.body.handle,
            Self::Friction(e) => e.body.handle,
            Self::Contract(e) => e.body.handle,
            Self::Phantom(e) => e.phantom.handle,
        }
    }

    /// True if the event mentions `body` on either side
    pub fn involves(&self, body: BodyHandle) -> bool {
        match self {
            Self::Collision(e) => e.body.handle == body || e.other.handle == body,
            Self::Friction(e) => e.body.handle == body || e.other.handle == body,
            Self::Contract(e) => e.body.handle == body,
            Self::Phantom(e) => e.phantom.handle == body || e.other.handle == body,
        }
    }
}

// ============================================================================
// Listener traits
// ============================================================================

/// Receives impacts
pub trait CollisionListener {
    /// Called once per new impact (subject to throttling)
    fn on_collision(&mut self, event: &CollisionEvent);
}

/// Receives contact pair start/end
pub trait FrictionListener {
    /// Called when a contact pair starts or ends
    fn on_friction(&mut self, event: &FrictionEvent);
}

/// Receives detection helper notifications
pub trait ContractListener {
    /// Called when a helper fires
    fn on_contract(&mut self, event: &ContractEvent);
}

/// Receives phantom enter/exit
pub trait PhantomListener {
    /// Called on every overlap transition
    fn on_phantom(&mut self, event: &PhantomEvent);
}

impl<F: FnMut(&CollisionEvent)> CollisionListener for F {
    fn on_collision(&mut self, event: &CollisionEvent) {
        self(event)
    }
}

impl<F: FnMut(&FrictionEvent)> FrictionListener for F {
    fn on_friction(&mut self, event: &FrictionEvent) {
        self(event)
    }
}

impl<F: FnMut(&ContractEvent)> ContractListener for F {
    fn on_contract(&mut self, event: &ContractEvent) {
        self(event)
    }
}

impl<F: FnMut(&PhantomEvent)> PhantomListener for F {
    fn on_phantom(&mut self, event: &PhantomEvent) {
        self(event)
    }
}

// ============================================================================
// Throttle
// ============================================================================

/// Minimum interval between two notifications
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Throttle {
    /// Silence after each notification (s)
    pub interval: f64,
    remaining: f64,
}

impl Throttle {
    /// Throttle with the given interval
    pub fn new(interval: f64) -> Self {
        Self {
            interval: interval.max(0.0),
            remaining: 0.0,
        }
    }

    /// True if a notification may go out now
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.remaining <= 0.0
    }

    /// Take the slot if ready; returns whether it was taken
    pub fn try_fire(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.remaining = self.interval;
        true
    }

    /// Let `dt` seconds of simulated time pass
    pub fn advance(&mut self, dt: f64) {
        self.remaining = (self.remaining - dt).max(0.0);
    }
}

// ============================================================================
// Registry
// ============================================================================

struct CollisionSubscription {
    listener: Option<Box<dyn CollisionListener>>,
    friction: Option<Box<dyn FrictionListener>>,
    throttle: Throttle,
}

/// Per-body listeners and the pending event queue
#[derive(Default)]
pub struct ListenerRegistry {
    collision: HashMap<BodyHandle, CollisionSubscription>,
    contract: HashMap<BodyHandle, Box<dyn ContractListener>>,
    phantom: HashMap<BodyHandle, Box<dyn PhantomListener>>,
    pending: Vec<PhysicsEvent>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("collision", &self.collision.len())
            .field("contract", &self.contract.len())
            .field("phantom", &self.phantom.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install collision and friction listeners on `body`
    pub fn set_collision_listener(
        &mut self,
        body: BodyHandle,
        listener: Option<Box<dyn CollisionListener>>,
        collision_call_sleep: f64,
        friction: Option<Box<dyn FrictionListener>>,
    ) {
        if listener.is_none() && friction.is_none() {
            self.collision.remove(&body);
            return;
        }
        self.collision.insert(
            body,
            CollisionSubscription {
                listener,
                friction,
                throttle: Throttle::new(collision_call_sleep),
            },
        );
    }

    /// Remove collision and friction listeners of `body`
    pub fn remove_collision_listener(&mut self, body: BodyHandle) -> bool {
        self.collision.remove(&body).is_some()
    }

    /// Install the contract listener of `body`
    pub fn set_contract_listener(&mut self, body: BodyHandle, listener: Box<dyn ContractListener>) {
        self.contract.insert(body, listener);
    }

    /// Remove the contract listener of `body`
    pub fn remove_contract_listener(&mut self, body: BodyHandle) -> bool {
        self.contract.remove(&body).is_some()
    }

    /// Install the phantom listener of `phantom`
    pub fn set_phantom_listener(&mut self, phantom: BodyHandle, listener: Box<dyn PhantomListener>) {
        self.phantom.insert(phantom, listener);
    }

    /// True if `body` listens for collisions
    pub fn has_collision_listener(&self, body: BodyHandle) -> bool {
        self.collision.get(&body).is_some_and(|s| s.listener.is_some())
    }

    /// True if `body` listens for friction pairs
    pub fn has_friction_listener(&self, body: BodyHandle) -> bool {
        self.collision.get(&body).is_some_and(|s| s.friction.is_some())
    }

    /// Queue a collision, honoring the listener's throttle
    pub fn queue_collision(&mut self, event: CollisionEvent) -> bool {
        let Some(sub) = self.collision.get_mut(&event.body.handle) else {
            return false;
        };
        if sub.listener.is_none() || !sub.throttle.try_fire() {
            return false;
        }
        self.pending.push(PhysicsEvent::Collision(event));
        true
    }

    /// Queue a friction pair notification
    pub fn queue_friction(&mut self, event: FrictionEvent) -> bool {
        if !self.has_friction_listener(event.body.handle) {
            return false;
        }
        self.pending.push(PhysicsEvent::Friction(event));
        true
    }

    /// Queue a contract notification
    pub fn queue_contract(&mut self, event: ContractEvent) -> bool {
        if !self.contract.contains_key(&event.body.handle) {
            return false;
        }
        self.pending.push(PhysicsEvent::Contract(event));
        true
    }

    /// Queue a phantom transition
    pub fn queue_phantom(&mut self, event: PhantomEvent) -> bool {
        if !self.phantom.contains_key(&event.phantom.handle) {
            return false;
        }
        self.pending.push(PhysicsEvent::Phantom(event));
        true
    }

    /// Events waiting for delivery
    pub fn pending(&self) -> &[PhysicsEvent] {
        &self.pending
    }

    /// Let `dt` seconds pass for every throttle
    pub fn advance(&mut self, dt: f64) {
        for sub in self.collision.values_mut() {
            sub.throttle.advance(dt);
        }
    }

    /// Drop pending events that mention `body`
    pub fn discard_pending_for(&mut self, body: BodyHandle) {
        self.pending.retain(|e| !e.involves(body));
    }

    /// Forget every listener registered on `body`
    pub fn remove_body(&mut self, body: BodyHandle) {
        self.collision.remove(&body);
        self.contract.remove(&body);
        self.phantom.remove(&body);
    }

    /// Deliver the queue in order; returns the number of listeners that panicked
    pub fn dispatch(&mut self) -> usize {
        let events = std::mem::take(&mut self.pending);
        let mut failures = 0;
        for event in &events {
            if !self.deliver(event) {
                failures += 1;
            }
        }
        failures
    }

    fn deliver(&mut self, event: &PhysicsEvent) -> bool {
        let target = event.target();
        let result = match event {
            PhysicsEvent::Collision(e) => match self.collision.get_mut(&target).and_then(|s| s.listener.as_mut()) {
                Some(l) => catch_unwind(AssertUnwindSafe(|| l.on_collision(e))),
                None => Ok(()),
            },
            PhysicsEvent::Friction(e) => match self.collision.get_mut(&target).and_then(|s| s.friction.as_mut()) {
                Some(l) => catch_unwind(AssertUnwindSafe(|| l.on_friction(e))),
                None => Ok(()),
            },
            PhysicsEvent::Contract(e) => match self.contract.get_mut(&target) {
                Some(l) => catch_unwind(AssertUnwindSafe(|| l.on_contract(e))),
                None => Ok(()),
            },
            PhysicsEvent::Phantom(e) => match self.phantom.get_mut(&target) {
                Some(l) => catch_unwind(AssertUnwindSafe(|| l.on_phantom(e))),
                None => Ok(()),
            },
        };
        if result.is_err() {
            log::error!("listener of body {target:?} panicked; event dropped");
            return false;
        }
        true
    }

    /// Drop every listener and pending event
    pub fn clear(&mut self) {
        self.collision.clear();
        self.contract.clear();
        self.phantom.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn body(i: u32) -> EventBody {
        EventBody {
            handle: BodyHandle::from_bits(u64::from(i)),
            user_data: i as usize,
        }
    }

    fn collision(i: u32, j: u32) -> CollisionEvent {
        CollisionEvent {
            body: body(i),
            other: body(j),
            point: DVec3::ZERO,
            speed: 3.0,
            normal: DVec3::Y,
        }
    }

    #[test]
    fn test_throttle() {
        let mut t = Throttle::new(0.5);
        assert!(t.try_fire());
        assert!(!t.try_fire());
        t.advance(0.3);
        assert!(!t.is_ready());
        t.advance(0.3);
        assert!(t.try_fire());
    }

    #[test]
    fn test_collision_throttled_per_body() {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = hits.clone();
        let mut registry = ListenerRegistry::new();
        registry.set_collision_listener(
            body(1).handle,
            Some(Box::new(move |e: &CollisionEvent| sink.borrow_mut().push(e.other.user_data))),
            1.0,
            None,
        );

        assert!(registry.queue_collision(collision(1, 2)));
        assert!(!registry.queue_collision(collision(1, 3)));
        assert!(!registry.queue_collision(collision(2, 1)), "no listener on body 2");
        registry.dispatch();
        assert_eq!(*hits.borrow(), vec![2]);

        registry.advance(1.0);
        assert!(registry.queue_collision(collision(1, 3)));
        registry.dispatch();
        assert_eq!(*hits.borrow(), vec![2, 3]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let seen = Rc::new(RefCell::new(0));
        let sink = seen.clone();
        let mut registry = ListenerRegistry::new();
        registry.set_collision_listener(
            body(1).handle,
            Some(Box::new(|_: &CollisionEvent| panic!("host failure"))),
            0.0,
            None,
        );
        registry.set_contract_listener(
            body(2).handle,
            Box::new(move |_: &ContractEvent| *sink.borrow_mut() += 1),
        );
        registry.queue_collision(collision(1, 2));
        registry.queue_contract(ContractEvent {
            body: body(2),
            col_id: 7,
            kind: ContractKind::Contact,
            speed_percent: 1.0,
            is_on: true,
        });

        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let failures = registry.dispatch();
        std::panic::set_hook(prev);

        assert_eq!(failures, 1);
        assert_eq!(*seen.borrow(), 1);
        assert!(registry.pending().is_empty());
    }

    #[test]
    fn test_discard_pending_for_body() {
        let mut registry = ListenerRegistry::new();
        registry.set_phantom_listener(body(0).handle, Box::new(|_: &PhantomEvent| {}));
        registry.queue_phantom(PhantomEvent {
            entered: false,
            phantom: body(0),
            other: body(5),
        });
        registry.queue_phantom(PhantomEvent {
            entered: false,
            phantom: body(0),
            other: body(6),
        });
        registry.discard_pending_for(body(5).handle);
        assert_eq!(registry.pending().len(), 1);
    }

    #[test]
    fn test_remove_listeners() {
        let mut registry = ListenerRegistry::new();
        registry.set_collision_listener(body(1).handle, None, 0.0, Some(Box::new(|_: &FrictionEvent| {})));
        assert!(registry.has_friction_listener(body(1).handle));
        assert!(!registry.has_collision_listener(body(1).handle));
        registry.remove_body(body(1).handle);
        assert!(!registry.has_friction_listener(body(1).handle));
    }
}
