//! Restores submission order for scheduler outputs.

use std::collections::HashMap;

use crate::error::ConsistencyError;

pub struct ResultMapper;

impl ResultMapper {
    /// Reorder `computed` to match `original_order`.
    ///
    /// Exactly one item per original call id is required. A duplicate, a missing
    /// id, or an id that was never submitted is a scheduler defect and is reported
    /// as a [`ConsistencyError`] instead of being patched over.
    pub fn map<T>(
        original_order: &[String],
        computed: Vec<(String, T)>,
    ) -> Result<Vec<T>, ConsistencyError> {
        let positions: HashMap<&str, usize> = original_order
            .iter()
            .enumerate()
            .map(|(index, call_id)| (call_id.as_str(), index))
            .collect();

        let mut slots: Vec<Option<T>> = Vec::with_capacity(original_order.len());
        slots.resize_with(original_order.len(), || None);

        for (call_id, item) in computed {
            let Some(&index) = positions.get(call_id.as_str()) else {
                return Err(ConsistencyError::UnknownCallId(call_id));
            };
            if slots[index].is_some() {
                return Err(ConsistencyError::DuplicateCallId(call_id));
            }
            slots[index] = Some(item);
        }

        slots
            .into_iter()
            .zip(original_order)
            .map(|(slot, call_id)| {
                slot.ok_or_else(|| ConsistencyError::MissingCallId(call_id.clone()))
            })
            .collect()
    }
}
