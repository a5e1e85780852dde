use super::*;
use chrono::Utc;
use shared::{
    domain::CorrelationId,
    protocol::{EventContext, EventKind},
};

fn event(id: &str) -> DashboardEvent {
    DashboardEvent {
        kind: EventKind::FilterBarExpandedChanged { expanded: true },
        correlation_id: CorrelationId::new(id),
        ctx: EventContext {
            workspace: "default".to_string(),
            dashboard_ref: None,
            emitted_at: Utc::now(),
        },
    }
}

#[test]
fn listeners_receive_events_in_registration_order() {
    let bus = EventBus::new(8);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let first = {
        let seen = seen.clone();
        bus.subscribe(move |event| seen.borrow_mut().push(format!("a:{}", event.correlation_id)))
    };
    let second = {
        let seen = seen.clone();
        bus.subscribe(move |event| seen.borrow_mut().push(format!("b:{}", event.correlation_id)))
    };

    bus.emit(event("1"));
    bus.emit(event("2"));

    assert_eq!(*seen.borrow(), vec!["a:1", "b:1", "a:2", "b:2"]);
    drop((first, second));
}

#[test]
fn dropping_a_subscription_stops_delivery() {
    let bus = EventBus::new(8);
    let count = Rc::new(Cell::new(0));

    let subscription = {
        let count = count.clone();
        bus.subscribe(move |_| count.set(count.get() + 1))
    };
    bus.emit(event("1"));
    drop(subscription);
    bus.emit(event("2"));

    assert_eq!(count.get(), 1);
    assert_eq!(bus.listener_count(), 0);
}

#[test]
fn listener_may_unsubscribe_others_during_delivery() {
    let bus = Rc::new(EventBus::new(8));
    let victim_calls = Rc::new(Cell::new(0));
    let victim_slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

    let remover = {
        let victim_slot = victim_slot.clone();
        bus.subscribe(move |_| {
            if let Some(subscription) = victim_slot.borrow_mut().take() {
                subscription.unsubscribe();
            }
        })
    };
    let victim = {
        let victim_calls = victim_calls.clone();
        bus.subscribe(move |_| victim_calls.set(victim_calls.get() + 1))
    };
    *victim_slot.borrow_mut() = Some(victim);

    bus.emit(event("1"));
    bus.emit(event("2"));

    assert_eq!(victim_calls.get(), 1);
    remover.detach();
}

#[tokio::test]
async fn broadcast_receivers_see_emitted_events() {
    let bus = EventBus::new(8);
    let mut receiver = bus.receiver();

    bus.emit(event("1"));

    let received = receiver.recv().await.expect("event");
    assert_eq!(received.correlation_id, CorrelationId::new("1"));
}

#[test]
fn a_panicking_listener_does_not_stop_delivery() {
    let bus = EventBus::new(8);
    let mut receiver = bus.receiver();
    let later_calls = Rc::new(Cell::new(0));

    let faulty = bus.subscribe(|_| panic!("listener bug"));
    let later = {
        let later_calls = later_calls.clone();
        bus.subscribe(move |_| later_calls.set(later_calls.get() + 1))
    };

    bus.emit(event("1"));
    bus.emit(event("2"));

    assert_eq!(later_calls.get(), 2);
    assert_eq!(
        receiver.try_recv().expect("broadcast").correlation_id,
        CorrelationId::new("1")
    );
    drop((faulty, later));
}
