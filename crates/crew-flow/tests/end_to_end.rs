//! End-to-end dispatch flow: a contractor comes online in San Antonio,
//! sees a new delivery task, claims it, works it, and completes it.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crew_core::{ContractorId, GeoPoint, OrderId};
use crew_flow::dispatch::RecordingPush;
use crew_flow::notify::memory::InMemoryLedger;
use crew_flow::prelude::*;
use crew_flow::store::memory::InMemoryTaskStore;
use crew_flow::task::PaymentAmount;

struct World {
    directory: Arc<InMemoryDirectory>,
    rooms: Arc<RoomDirectory>,
    ledger: Arc<InMemoryLedger>,
    push: Arc<RecordingPush>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: TaskLifecycle,
}

fn world() -> World {
    let store = Arc::new(InMemoryTaskStore::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let rooms = Arc::new(RoomDirectory::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let push = Arc::new(RecordingPush::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&rooms),
        Arc::clone(&ledger) as Arc<dyn NotificationLedger>,
        Arc::clone(&push) as Arc<dyn LivePush>,
        DispatchConfig::default(),
    ));
    let lifecycle = TaskLifecycle::new(
        store as Arc<dyn TaskStore>,
        Arc::clone(&directory) as Arc<dyn ContractorDirectory>,
        Arc::clone(&dispatcher),
    );
    World {
        directory,
        rooms,
        ledger,
        push,
        dispatcher,
        lifecycle,
    }
}

impl World {
    /// Registers a contractor, joins their rooms, and brings them online.
    fn connect(&self, name: &str, skills: &[&str], at: GeoPoint) -> ContractorId {
        let id = ContractorId::generate();
        let skills: Vec<String> = skills.iter().map(|s| (*s).to_string()).collect();
        self.directory
            .upsert(ContractorProfile {
                id,
                name: name.to_string(),
                skills: skills.clone(),
                verified: true,
            })
            .unwrap();
        self.rooms.join_identity_rooms(id, &skills).unwrap();
        self.rooms.update_location(id, at, 50).unwrap();
        self.push.set_online(id, true);
        id
    }
}

fn downtown() -> GeoPoint {
    GeoPoint::new(29.4241, -98.4936).unwrap()
}

fn delivery_near_downtown() -> NewTask {
    NewTask {
        order_id: OrderId::generate(),
        task_type: TaskType::Delivery,
        priority: TaskPriority::High,
        scheduled_at: Utc::now() + Duration::hours(3),
        location: Some(GeoPoint::new(29.5, -98.5).unwrap()),
        address: Some("400 Riverwalk".into()),
        payment_amount: Some(PaymentAmount::from_dollars(85.0).unwrap()),
    }
}

#[tokio::test]
async fn claim_flow_from_announcement_to_completion() {
    let w = world();
    let maya = w.connect("Maya", &["Delivery"], downtown());
    let ray = w.connect("Ray", &["Delivery"], downtown());
    // Sam has the wrong skill and is out of proximity range up in Austin.
    let sam = w.connect("Sam", &["Maintenance"], GeoPoint::new(30.2672, -97.7431).unwrap());

    let task = w.lifecycle.create(delivery_near_downtown()).await.unwrap();

    // Both delivery contractors see task:new; Sam is reached by neither the
    // skill room nor the proximity scan.
    for id in [&maya, &ray] {
        let events = w.push.sent_to(id);
        assert!(
            matches!(&events[..], [OutboundEvent::TaskNew { task: t }] if t.task_id == task.id),
            "expected one task:new for {id}"
        );
    }
    assert!(w.push.sent_to(&sam).is_empty());
    w.push.clear();

    // Maya claims: she gets task:assigned, Ray gets task:claimed.
    let outcome = w.lifecycle.claim(&task.id, &maya).await.unwrap();
    assert!(outcome.is_claimed());

    let to_maya = w.push.sent_to(&maya);
    assert!(matches!(
        &to_maya[..],
        [OutboundEvent::TaskAssigned { assigned_to, .. }] if *assigned_to == maya
    ));
    let to_ray = w.push.sent_to(&ray);
    assert!(matches!(
        &to_ray[..],
        [OutboundEvent::TaskClaimed { claimed_by, status: TaskStatus::Assigned, .. }]
            if *claimed_by == maya
    ));
    w.push.clear();

    // Work it to completion.
    w.lifecycle
        .update_status(&task.id, TaskStatus::InProgress, &maya.to_string(), None)
        .await
        .unwrap();
    let done = w
        .lifecycle
        .complete(&task.id, &maya, vec!["castle-packed.jpg".into()], None)
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    let stamp = done.completed_at.expect("completion stamp");

    // Assigned contractors saw the in-progress update and the completion.
    let events = w.push.sent_to(&maya);
    assert!(matches!(events[0], OutboundEvent::TaskUpdated { .. }));
    assert!(matches!(
        events[1],
        OutboundEvent::TaskCompleted { completed_at, .. } if completed_at == stamp
    ));
    // Ray was never assigned, so lifecycle updates don't reach him.
    assert!(w.push.sent_to(&ray).is_empty());
}

#[tokio::test]
async fn offline_contractor_gets_backlog_on_reconnect() {
    let w = world();
    let maya = w.connect("Maya", &["Delivery"], downtown());
    w.push.set_online(maya, false);

    let task = w.lifecycle.create(delivery_near_downtown()).await.unwrap();

    // Nothing crossed the wire; the announcement landed in the ledger.
    assert!(w.push.sent_to(&maya).is_empty());
    let backlog = w.ledger.undelivered_for(&maya, 10).await.unwrap();
    assert_eq!(backlog.len(), 1);

    // Reconnect and replay.
    w.push.set_online(maya, true);
    let replayed = w.dispatcher.replay_backlog(&maya).await.unwrap();
    assert_eq!(replayed, 1);

    let events = w.push.sent_to(&maya);
    assert!(matches!(
        &events[..],
        [OutboundEvent::NotificationSystem { notification }]
            if notification.data["data"]["task"]["taskId"] == task.id.to_string()
    ));

    // Replaying again is a no-op: delivery was marked.
    w.push.clear();
    assert_eq!(w.dispatcher.replay_backlog(&maya).await.unwrap(), 0);
    assert!(w.push.sent_to(&maya).is_empty());
}

#[tokio::test]
async fn cancellation_reopens_and_reannounces_nothing_extra() {
    let w = world();
    let maya = w.connect("Maya", &["Delivery"], downtown());

    let task = w.lifecycle.create(delivery_near_downtown()).await.unwrap();
    w.lifecycle.claim(&task.id, &maya).await.unwrap();
    w.push.clear();

    w.lifecycle
        .update_status(&task.id, TaskStatus::Cancelled, "dispatcher", Some("rained out".into()))
        .await
        .unwrap();
    let events = w.push.sent_to(&maya);
    assert!(matches!(
        &events[..],
        [OutboundEvent::TaskCancelled { status: TaskStatus::Cancelled, .. }]
    ));

    // Cancelled tasks can reopen to Pending and be claimed again.
    let reopened = w
        .lifecycle
        .update_status(&task.id, TaskStatus::Pending, "dispatcher", None)
        .await
        .unwrap();
    assert_eq!(reopened.status, TaskStatus::Pending);
    assert_eq!(reopened.assigned_to, None);

    assert!(w.lifecycle.claim(&task.id, &maya).await.unwrap().is_claimed());
}
