// src/engine/cleaning.rs

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::models::{CleaningRecord, CleaningTarget, CleaningType, NewCleaningRecord};
use crate::store::{config_or_default, Store, StoreTx};

/// Highest-priority type among `types`, regardless of order.
pub fn winning_type(types: impl IntoIterator<Item = CleaningType>) -> Option<CleaningType> {
    types.into_iter().max()
}

pub fn validate(record: &NewCleaningRecord) -> EngineResult<CleaningTarget> {
    let target = match (record.room_id, record.common_area_id) {
        (Some(id), None) => CleaningTarget::Room(id),
        (None, Some(id)) => CleaningTarget::CommonArea(id),
        (Some(_), Some(_)) => {
            return Err(EngineError::Validation(
                "a cleaning record targets either a room or a common area, not both".into(),
            ))
        }
        (None, None) => {
            return Err(EngineError::Validation(
                "a cleaning record needs a room_id or a common_area_id".into(),
            ))
        }
    };

    if record.types_performed.is_empty() {
        return Err(EngineError::Validation("types_performed must not be empty".into()));
    }

    let rotates = record.types_performed.contains(&CleaningType::RotacionColchones);
    match target {
        CleaningTarget::CommonArea(_) if rotates => {
            return Err(EngineError::Validation(
                "mattress rotation can only be recorded on rooms".into(),
            ))
        }
        CleaningTarget::CommonArea(_) if !record.bathroom_areas_covered.is_empty() => {
            return Err(EngineError::Validation(
                "bathroom areas can only be recorded on rooms".into(),
            ))
        }
        _ => {}
    }
    let has_procedure = record
        .mattress_rotation_procedure
        .as_deref()
        .is_some_and(|p| !p.trim().is_empty());
    if rotates && !has_procedure {
        return Err(EngineError::Validation(
            "mattress_rotation_procedure is required when rotating mattresses".into(),
        ));
    }

    Ok(target)
}

/// Inserts the record and applies its side effects against `tx`. The caller commits.
pub async fn create_in(
    tx: &mut dyn StoreTx,
    input: &NewCleaningRecord,
) -> EngineResult<CleaningRecord> {
    let target = validate(input)?;
    let winning = winning_type(input.types_performed.iter().copied())
        .ok_or_else(|| EngineError::Validation("types_performed must not be empty".into()))?;
    let disinfected = input.types_performed.iter().any(|t| t.is_disinfection());
    let ts = input.timestamp;

    match target {
        CleaningTarget::Room(room_id) => {
            let mut room = tx
                .get_room(room_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("room {room_id}")))?;
            let record = tx.insert_cleaning_record(input).await?;

            room.last_cleaning_date = Some(ts);
            room.last_cleaning_type = Some(winning);
            room.requires_cleaning_today = false;
            if disinfected {
                room.requires_disinfection_today = false;
            }
            if record.types_performed.contains(&CleaningType::RotacionColchones) {
                let config = config_or_default(tx).await?;
                let frequency = config.mattress_rotation_frequency_days;
                room.last_mattress_rotation_date = Some(ts);
                room.next_mattress_rotation_date = Some(ts + Duration::days(i64::from(frequency)));
                room.days_remaining_rotation = Some(frequency);
                room.requires_mattress_rotation = false;
            }
            tx.update_room_housekeeping(&room).await?;
            Ok(record)
        }
        CleaningTarget::CommonArea(area_id) => {
            let mut area = tx
                .get_common_area(area_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("common area {area_id}")))?;
            let record = tx.insert_cleaning_record(input).await?;

            area.last_cleaning_date = Some(ts);
            area.last_cleaning_type = Some(winning);
            area.requires_cleaning_today = false;
            if disinfected {
                let config = config_or_default(tx).await?;
                area.next_disinfection_date = Some(
                    ts + Duration::days(i64::from(config.common_area_disinfection_frequency_days)),
                );
            }
            tx.update_common_area_housekeeping(&area).await?;
            Ok(record)
        }
    }
}

pub struct CleaningService {
    store: Arc<dyn Store>,
}

impl CleaningService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, input: &NewCleaningRecord) -> EngineResult<CleaningRecord> {
        let mut tx = self.store.begin().await?;
        let record = create_in(tx.as_mut(), input).await?;
        tx.commit().await?;
        info!(
            cleaning_record_id = record.cleaning_record_id,
            target = ?record.target,
            staff_id = record.staff_id,
            "cleaning recorded"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::utc;
    use crate::models::{CommonArea, HousekeepingConfig, Room};
    use crate::store::MemoryStore;

    fn room_input(room_id: i64, types: &[CleaningType]) -> NewCleaningRecord {
        NewCleaningRecord {
            room_id: Some(room_id),
            common_area_id: None,
            staff_id: 7,
            timestamp: utc("2024-03-01T10:00:00Z"),
            areas_covered: vec!["Cama".into()],
            bathroom_areas_covered: vec![],
            types_performed: types.to_vec(),
            lost_items_found: false,
            animal_traces_found: false,
            notes: None,
            mattress_rotation_procedure: types
                .contains(&CleaningType::RotacionColchones)
                .then(|| "Girar y voltear".to_string()),
        }
    }

    async fn store_with_room() -> (MemoryStore, CleaningService) {
        let store = MemoryStore::new();
        store.reserve_ids(1000).await;
        store
            .seed_room(Room { requires_cleaning_today: true, ..Room::new(1, "101") })
            .await;
        store
            .seed_common_area(CommonArea { requires_cleaning_today: true, ..CommonArea::new(5, "Lobby") })
            .await;
        let service = CleaningService::new(Arc::new(store.clone()));
        (store, service)
    }

    #[test]
    fn winning_type_is_the_maximum_in_any_order() {
        // every non-empty subset, forwards and backwards
        for mask in 1u32..(1 << CleaningType::ALL.len()) {
            let subset: Vec<CleaningType> = CleaningType::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, t)| *t)
                .collect();
            let expected = subset.iter().copied().max_by_key(|t| t.priority());
            assert_eq!(winning_type(subset.iter().copied()), expected);
            assert_eq!(winning_type(subset.iter().rev().copied()), expected);
        }
        assert_eq!(winning_type(Vec::new()), None);
    }

    #[test]
    fn validation_rejects_malformed_input() {
        let mut both = room_input(1, &[CleaningType::Limpieza]);
        both.common_area_id = Some(5);
        assert!(matches!(validate(&both), Err(EngineError::Validation(_))));

        let mut neither = room_input(1, &[CleaningType::Limpieza]);
        neither.room_id = None;
        assert!(matches!(validate(&neither), Err(EngineError::Validation(_))));

        assert!(matches!(validate(&room_input(1, &[])), Err(EngineError::Validation(_))));

        let mut no_procedure = room_input(1, &[CleaningType::RotacionColchones]);
        no_procedure.mattress_rotation_procedure = Some("  ".into());
        assert!(matches!(validate(&no_procedure), Err(EngineError::Validation(_))));

        let mut area_rotation = room_input(1, &[CleaningType::RotacionColchones]);
        area_rotation.room_id = None;
        area_rotation.common_area_id = Some(5);
        assert!(matches!(validate(&area_rotation), Err(EngineError::Validation(_))));

        assert_eq!(validate(&room_input(1, &[CleaningType::Limpieza])).unwrap(), CleaningTarget::Room(1));
    }

    #[tokio::test]
    async fn rotation_record_updates_room_and_schedules_next_rotation() {
        let (store, service) = store_with_room().await;
        store
            .seed_config(HousekeepingConfig { mattress_rotation_frequency_days: 90, ..HousekeepingConfig::default() })
            .await;
        store
            .seed_room(Room { requires_mattress_rotation: true, ..store.room(1).await.unwrap() })
            .await;

        let input = room_input(1, &[CleaningType::Limpieza, CleaningType::RotacionColchones]);
        let record = service.create(&input).await.unwrap();
        assert_eq!(record.target, CleaningTarget::Room(1));

        let room = store.room(1).await.unwrap();
        assert_eq!(room.last_cleaning_type, Some(CleaningType::RotacionColchones));
        assert_eq!(room.last_cleaning_date, Some(input.timestamp));
        assert!(!room.requires_cleaning_today);
        assert!(!room.requires_mattress_rotation);
        assert_eq!(room.last_mattress_rotation_date, Some(input.timestamp));
        assert_eq!(room.next_mattress_rotation_date, Some(utc("2024-05-30T10:00:00Z")));
        assert_eq!(room.days_remaining_rotation, Some(90));
    }

    #[tokio::test]
    async fn rotation_without_config_creates_defaults() {
        let (store, service) = store_with_room().await;
        assert!(store.config().await.is_none());

        let input = room_input(1, &[CleaningType::RotacionColchones]);
        service.create(&input).await.unwrap();

        assert_eq!(store.config().await.unwrap().mattress_rotation_frequency_days, 180);
        let room = store.room(1).await.unwrap();
        assert_eq!(room.next_mattress_rotation_date, Some(input.timestamp + Duration::days(180)));
    }

    #[tokio::test]
    async fn plain_cleaning_leaves_rotation_schedule_alone() {
        let (store, service) = store_with_room().await;
        service
            .create(&room_input(1, &[CleaningType::LimpiezaBanio, CleaningType::Desinfeccion]))
            .await
            .unwrap();

        let room = store.room(1).await.unwrap();
        assert_eq!(room.last_cleaning_type, Some(CleaningType::LimpiezaBanio));
        assert_eq!(room.next_mattress_rotation_date, None);
        assert!(store.config().await.is_none());
    }

    #[tokio::test]
    async fn common_area_disinfection_sets_next_due_date() {
        let (store, service) = store_with_room().await;
        let mut input = room_input(1, &[CleaningType::Limpieza, CleaningType::Desinfeccion]);
        input.room_id = None;
        input.common_area_id = Some(5);
        service.create(&input).await.unwrap();

        let area = store.common_area(5).await.unwrap();
        assert!(!area.requires_cleaning_today);
        assert_eq!(area.last_cleaning_type, Some(CleaningType::Desinfeccion));
        assert_eq!(area.next_disinfection_date, Some(input.timestamp + Duration::days(7)));
    }

    #[tokio::test]
    async fn missing_or_deleted_target_creates_nothing() {
        let (store, service) = store_with_room().await;
        store.seed_room(Room { deleted: true, ..Room::new(2, "102") }).await;

        for room_id in [2, 99] {
            let err = service.create(&room_input(room_id, &[CleaningType::Limpieza])).await.unwrap_err();
            assert!(matches!(err, EngineError::NotFound(_)));
        }
        assert_eq!(store.cleaning_record_count().await, 0);
    }

    #[tokio::test]
    async fn failed_side_effect_rolls_back_the_insert() {
        let (store, service) = store_with_room().await;
        store.fail_operation("update_room_housekeeping");

        let err = service.create(&room_input(1, &[CleaningType::Limpieza])).await.unwrap_err();
        assert!(matches!(err, EngineError::TransientStore(_)));
        assert_eq!(store.cleaning_record_count().await, 0);
        assert!(store.room(1).await.unwrap().requires_cleaning_today);
    }
}
