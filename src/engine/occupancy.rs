// src/engine/occupancy.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::broadcast::ChangeBroadcaster;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    OccupancyState, Reservation, ReservationState, ReservationStateChange, Room, RoomStateChange,
};
use crate::store::{Store, StoreTx};

/// How far ahead a reservation start flips a free room to RESERVED.
pub const RESERVATION_HORIZON_HOURS: i64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizedReservation {
    pub reservation_id: i64,
    pub room_id: i64,
}

/// Transitions computed for one cycle. The three room lists are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyPlan {
    pub to_reserved: Vec<i64>,
    pub to_occupied: Vec<i64>,
    pub to_free: Vec<i64>,
    pub to_finalize: Vec<FinalizedReservation>,
}

impl OccupancyPlan {
    pub fn is_empty(&self) -> bool {
        self.to_reserved.is_empty()
            && self.to_occupied.is_empty()
            && self.to_free.is_empty()
            && self.to_finalize.is_empty()
    }

    pub fn room_changes(&self) -> Vec<RoomStateChange> {
        let tag = |ids: &[i64], new_state| {
            ids.iter()
                .map(move |&room_id| RoomStateChange { room_id, new_state })
                .collect::<Vec<_>>()
        };
        let mut changes = tag(&self.to_reserved, OccupancyState::Reserved);
        changes.extend(tag(&self.to_occupied, OccupancyState::Occupied));
        changes.extend(tag(&self.to_free, OccupancyState::Free));
        changes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub cycle_id: Uuid,
    pub rooms_reserved: usize,
    pub rooms_occupied: usize,
    pub rooms_freed: usize,
    pub reservations_finalized: usize,
}

impl ReconcileSummary {
    fn from_plan(cycle_id: Uuid, plan: &OccupancyPlan) -> Self {
        Self {
            cycle_id,
            rooms_reserved: plan.to_reserved.len(),
            rooms_occupied: plan.to_occupied.len(),
            rooms_freed: plan.to_free.len(),
            reservations_finalized: plan.to_finalize.len(),
        }
    }
}

// A room whose stay is under way goes OCCUPIED even if another stay starts
// within the horizon, so no room lands in two lists.
pub fn plan_cycle(now: DateTime<Utc>, rooms: &[Room], reservations: &[Reservation]) -> OccupancyPlan {
    let horizon = now + Duration::hours(RESERVATION_HORIZON_HOURS);

    let mut by_room: HashMap<i64, Vec<&Reservation>> = HashMap::new();
    for r in reservations.iter().filter(|r| !r.deleted) {
        by_room.entry(r.room_id).or_default().push(r);
    }

    let mut plan = OccupancyPlan::default();
    for room in rooms.iter().filter(|r| !r.deleted) {
        let held = by_room.get(&room.room_id).map(Vec::as_slice).unwrap_or_default();
        let reserved = || held.iter().filter(|r| r.state == ReservationState::Reserved);

        let in_stay = reserved().any(|r| r.is_active_at(now));
        let arriving = reserved().any(|r| r.starts_within(now, horizon));
        let holds_room = held.iter().any(|r| {
            matches!(r.state, ReservationState::Reserved | ReservationState::Pending)
                && (r.starts_within(now, horizon) || r.is_active_at(now))
        });

        let current = room.occupancy_state;
        if in_stay && current != OccupancyState::Occupied {
            plan.to_occupied.push(room.room_id);
        } else if arriving && current == OccupancyState::Free {
            plan.to_reserved.push(room.room_id);
        } else if !holds_room && current != OccupancyState::Free {
            plan.to_free.push(room.room_id);
        }
    }

    plan.to_finalize = reservations
        .iter()
        .filter(|r| !r.deleted && r.state == ReservationState::Reserved && r.end_time < now)
        .map(|r| FinalizedReservation { reservation_id: r.reservation_id, room_id: r.room_id })
        .collect();

    plan
}

/// Reads, plans and writes one cycle against `tx`. The caller commits.
pub async fn reconcile_in(tx: &mut dyn StoreTx, now: DateTime<Utc>) -> EngineResult<OccupancyPlan> {
    let rooms = tx.list_rooms().await?;
    let reservations = tx
        .list_reservations_in_states(&[ReservationState::Pending, ReservationState::Reserved])
        .await?;

    let plan = plan_cycle(now, &rooms, &reservations);

    tx.set_occupancy(&plan.to_reserved, OccupancyState::Reserved).await?;
    tx.set_occupancy(&plan.to_occupied, OccupancyState::Occupied).await?;
    tx.set_occupancy(&plan.to_free, OccupancyState::Free).await?;
    let finalize_ids: Vec<i64> = plan.to_finalize.iter().map(|f| f.reservation_id).collect();
    tx.set_reservation_state(&finalize_ids, ReservationState::Finalized).await?;

    Ok(plan)
}

pub struct OccupancyReconciler {
    store: Arc<dyn Store>,
    broadcaster: Arc<ChangeBroadcaster>,
}

impl OccupancyReconciler {
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<ChangeBroadcaster>) -> Self {
        Self { store, broadcaster }
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> EngineResult<ReconcileSummary> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("reconcile", %cycle_id, %now);
        async move {
            let mut tx = self.store.begin().await?;
            let plan = reconcile_in(tx.as_mut(), now).await?;
            tx.commit().await?;

            self.broadcast(&plan);

            let summary = ReconcileSummary::from_plan(cycle_id, &plan);
            if plan.is_empty() {
                debug!("occupancy unchanged");
            } else {
                info!(
                    reserved = summary.rooms_reserved,
                    occupied = summary.rooms_occupied,
                    freed = summary.rooms_freed,
                    finalized = summary.reservations_finalized,
                    "occupancy reconciled"
                );
            }
            Ok::<_, EngineError>(summary)
        }
        .instrument(span)
        .await
    }

    pub async fn scheduled_tick(&self, now: DateTime<Utc>) {
        if let Err(e) = self.run_cycle(now).await {
            error!(job = super::OCCUPANCY_JOB, %now, error = %e, "reconciliation cycle failed");
        }
    }

    fn broadcast(&self, plan: &OccupancyPlan) {
        self.broadcaster.publish_room_states(plan.room_changes());
        for f in &plan.to_finalize {
            self.broadcaster.publish_reservation(
                f.room_id,
                ReservationStateChange {
                    reservation_id: f.reservation_id,
                    new_state: ReservationState::Finalized,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::utc;
    use crate::store::MemoryStore;
    use tokio::sync::broadcast::error::TryRecvError;

    fn now() -> DateTime<Utc> {
        utc("2024-03-01T12:00:00Z")
    }

    fn room(id: i64, state: OccupancyState) -> Room {
        Room { occupancy_state: state, ..Room::new(id, format!("{id}")) }
    }

    fn reservation(
        id: i64,
        room_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        state: ReservationState,
    ) -> Reservation {
        Reservation { reservation_id: id, room_id, start_time: start, end_time: end, state, deleted: false }
    }

    async fn setup(rooms: Vec<Room>, reservations: Vec<Reservation>) -> (MemoryStore, OccupancyReconciler, Arc<ChangeBroadcaster>) {
        let store = MemoryStore::new();
        for r in rooms {
            store.seed_room(r).await;
        }
        for r in reservations {
            store.seed_reservation(r).await;
        }
        let bus = Arc::new(ChangeBroadcaster::new(16));
        let reconciler = OccupancyReconciler::new(Arc::new(store.clone()), Arc::clone(&bus));
        (store, reconciler, bus)
    }

    #[test]
    fn arrival_within_horizon_reserves_but_does_not_occupy() {
        let rooms = [room(1, OccupancyState::Free)];
        let res = [reservation(
            10,
            1,
            now() + Duration::hours(3),
            now() + Duration::days(2),
            ReservationState::Reserved,
        )];
        let plan = plan_cycle(now(), &rooms, &res);
        assert_eq!(plan.to_reserved, vec![1]);
        assert!(plan.to_occupied.is_empty());
        assert!(plan.to_free.is_empty());
    }

    #[test]
    fn horizon_bounds_are_inclusive() {
        let rooms = [room(1, OccupancyState::Free), room(2, OccupancyState::Free)];
        let res = [
            reservation(10, 1, now() + Duration::hours(6), now() + Duration::days(1), ReservationState::Reserved),
            reservation(
                20,
                2,
                now() + Duration::hours(6) + Duration::seconds(1),
                now() + Duration::days(1),
                ReservationState::Reserved,
            ),
        ];
        let plan = plan_cycle(now(), &rooms, &res);
        assert_eq!(plan.to_reserved, vec![1]);
    }

    #[test]
    fn stay_under_way_occupies() {
        let rooms = [room(1, OccupancyState::Free), room(2, OccupancyState::Reserved)];
        let res = [
            reservation(10, 1, now() - Duration::hours(1), now() + Duration::days(2), ReservationState::Reserved),
            reservation(20, 2, now(), now() + Duration::days(1), ReservationState::Reserved),
        ];
        let plan = plan_cycle(now(), &rooms, &res);
        assert_eq!(plan.to_occupied, vec![1, 2]);
        assert!(plan.to_reserved.is_empty());
    }

    #[test]
    fn active_stay_wins_over_upcoming_arrival() {
        let rooms = [room(1, OccupancyState::Free)];
        let res = [
            reservation(10, 1, now() - Duration::hours(1), now() + Duration::hours(1), ReservationState::Reserved),
            reservation(11, 1, now() + Duration::hours(2), now() + Duration::days(1), ReservationState::Reserved),
        ];
        let plan = plan_cycle(now(), &rooms, &res);
        assert_eq!(plan.to_occupied, vec![1]);
        assert!(plan.to_reserved.is_empty());
        assert!(plan.to_free.is_empty());
    }

    #[test]
    fn rooms_without_holding_reservations_are_freed() {
        let rooms = [
            room(1, OccupancyState::Occupied),
            room(2, OccupancyState::Reserved),
            room(3, OccupancyState::Reserved),
            room(4, OccupancyState::Free),
        ];
        let res = [
            // pending hold keeps room 3 from being freed, but cannot reserve it
            reservation(30, 3, now() + Duration::hours(1), now() + Duration::days(1), ReservationState::Pending),
            // too far ahead to hold room 2
            reservation(20, 2, now() + Duration::days(3), now() + Duration::days(4), ReservationState::Reserved),
        ];
        let plan = plan_cycle(now(), &rooms, &res);
        assert_eq!(plan.to_free, vec![1, 2]);
        assert!(plan.to_reserved.is_empty());
    }

    #[test]
    fn occupied_room_with_next_arrival_is_left_alone() {
        let rooms = [room(1, OccupancyState::Occupied)];
        let res = [reservation(
            10,
            1,
            now() + Duration::hours(2),
            now() + Duration::days(1),
            ReservationState::Reserved,
        )];
        assert!(plan_cycle(now(), &rooms, &res).is_empty());
    }

    #[test]
    fn deleted_reservations_hold_nothing() {
        let rooms = [room(1, OccupancyState::Occupied)];
        let mut r = reservation(10, 1, now() - Duration::hours(1), now() + Duration::days(1), ReservationState::Reserved);
        r.deleted = true;
        let plan = plan_cycle(now(), &rooms, &[r]);
        assert_eq!(plan.to_free, vec![1]);
    }

    #[test]
    fn ended_reserved_stays_are_finalized() {
        let rooms = [room(1, OccupancyState::Occupied)];
        let res = [
            reservation(10, 1, now() - Duration::days(2), now() - Duration::minutes(1), ReservationState::Reserved),
            reservation(11, 1, now() - Duration::days(2), now() - Duration::minutes(1), ReservationState::Pending),
            reservation(12, 1, now() - Duration::days(2), now(), ReservationState::Reserved),
        ];
        let plan = plan_cycle(now(), &rooms, &res);
        assert_eq!(plan.to_finalize, vec![FinalizedReservation { reservation_id: 10, room_id: 1 }]);
    }

    #[tokio::test]
    async fn cycle_commits_and_broadcasts_after_commit() {
        let (store, reconciler, bus) = setup(
            vec![room(1, OccupancyState::Occupied), room(2, OccupancyState::Free)],
            vec![
                reservation(10, 1, now() - Duration::days(2), now() - Duration::minutes(1), ReservationState::Reserved),
                reservation(20, 2, now() - Duration::hours(1), now() + Duration::days(2), ReservationState::Reserved),
            ],
        )
        .await;
        let mut rooms_rx = bus.subscribe_room_states();
        let mut room_1_rx = bus.subscribe_reservations(1);
        let mut room_2_rx = bus.subscribe_reservations(2);

        let summary = reconciler.run_cycle(now()).await.unwrap();
        assert_eq!(summary.rooms_occupied, 1);
        assert_eq!(summary.rooms_freed, 1);
        assert_eq!(summary.reservations_finalized, 1);

        assert_eq!(store.room(1).await.unwrap().occupancy_state, OccupancyState::Free);
        assert_eq!(store.room(2).await.unwrap().occupancy_state, OccupancyState::Occupied);
        assert_eq!(store.reservation(10).await.unwrap().state, ReservationState::Finalized);

        let batch = rooms_rx.try_recv().unwrap();
        assert_eq!(
            batch,
            vec![
                RoomStateChange { room_id: 2, new_state: OccupancyState::Occupied },
                RoomStateChange { room_id: 1, new_state: OccupancyState::Free },
            ]
        );
        assert_eq!(
            room_1_rx.try_recv().unwrap(),
            ReservationStateChange { reservation_id: 10, new_state: ReservationState::Finalized }
        );
        assert!(matches!(room_1_rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(room_2_rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn second_cycle_without_changes_is_a_no_op() {
        let (_store, reconciler, bus) = setup(
            vec![room(1, OccupancyState::Free), room(2, OccupancyState::Reserved)],
            vec![
                reservation(10, 1, now() + Duration::hours(3), now() + Duration::days(2), ReservationState::Reserved),
                reservation(20, 2, now() - Duration::days(3), now() - Duration::hours(2), ReservationState::Reserved),
            ],
        )
        .await;
        let mut rooms_rx = bus.subscribe_room_states();

        let first = reconciler.run_cycle(now()).await.unwrap();
        assert_eq!((first.rooms_reserved, first.rooms_freed, first.reservations_finalized), (1, 1, 1));

        let second = reconciler.run_cycle(now()).await.unwrap();
        assert_eq!(
            (second.rooms_reserved, second.rooms_occupied, second.rooms_freed, second.reservations_finalized),
            (0, 0, 0, 0)
        );

        assert_eq!(rooms_rx.try_recv().unwrap().len(), 2);
        // "ran, no change" is still announced
        assert!(rooms_rx.try_recv().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_commits_nothing_and_broadcasts_nothing() {
        let (store, reconciler, bus) = setup(
            vec![room(1, OccupancyState::Free)],
            vec![
                reservation(10, 1, now() - Duration::hours(1), now() + Duration::days(1), ReservationState::Reserved),
                reservation(11, 1, now() - Duration::days(3), now() - Duration::days(1), ReservationState::Reserved),
            ],
        )
        .await;
        let mut rooms_rx = bus.subscribe_room_states();
        store.fail_operation("set_reservation_state");

        assert!(reconciler.run_cycle(now()).await.is_err());
        assert_eq!(store.room(1).await.unwrap().occupancy_state, OccupancyState::Free);
        assert_eq!(store.reservation(11).await.unwrap().state, ReservationState::Reserved);
        assert!(matches!(rooms_rx.try_recv(), Err(TryRecvError::Empty)));

        // the scheduled path swallows the error; the next tick picks the work up
        reconciler.scheduled_tick(now()).await;
        store.clear_failures();
        reconciler.scheduled_tick(now()).await;
        assert_eq!(store.room(1).await.unwrap().occupancy_state, OccupancyState::Occupied);
        assert_eq!(store.reservation(11).await.unwrap().state, ReservationState::Finalized);
    }

    #[tokio::test]
    async fn every_finalization_gets_its_own_event_on_the_room_channel() {
        let (_store, reconciler, bus) = setup(
            vec![room(1, OccupancyState::Occupied)],
            vec![
                reservation(10, 1, now() - Duration::days(4), now() - Duration::days(3), ReservationState::Reserved),
                reservation(11, 1, now() - Duration::days(2), now() - Duration::minutes(1), ReservationState::Reserved),
            ],
        )
        .await;
        let mut room_rx = bus.subscribe_reservations(1);

        reconciler.run_cycle(now()).await.unwrap();

        let mut ids = vec![room_rx.try_recv().unwrap().reservation_id, room_rx.try_recv().unwrap().reservation_id];
        ids.sort();
        assert_eq!(ids, vec![10, 11]);
    }
}
