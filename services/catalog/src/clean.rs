//! Post-import removal of less specific tabular items.
//!
//! A dataset imported from several sheets often carries national, province and
//! area council rows for the same figures. Once finer rows exist the coarser
//! ones are dropped.

use tracing::info;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{DatasetKind, RegionLevel};
use crate::store::CatalogStore;

/// Delete the dataset's items that lack an area council when any item has
/// one, then those lacking a province when any remaining item has one.
/// Returns the number of deleted items. Running it again deletes nothing.
pub async fn clean_redundant_tabular_items<S>(store: &S, dataset_id: Uuid) -> StoreResult<u64>
where
    S: CatalogStore + ?Sized,
{
    let mut removed = 0;

    let coverage = store.tabular_coverage(dataset_id).await?;
    if coverage.with_area_council > 0 {
        removed += store
            .delete_tabular_items_without(dataset_id, RegionLevel::AreaCouncil)
            .await?;
    }

    let coverage = store.tabular_coverage(dataset_id).await?;
    if coverage.with_province > 0 {
        removed += store
            .delete_tabular_items_without(dataset_id, RegionLevel::Province)
            .await?;
    }

    info!(%dataset_id, removed, "redundant tabular items removed");
    Ok(removed)
}

/// Clean every listed tabular dataset and describe the result. Unknown ids
/// fail before anything is deleted.
pub async fn clean_datasets<S>(store: &S, dataset_ids: &[Uuid]) -> StoreResult<String>
where
    S: CatalogStore + ?Sized,
{
    let mut names = Vec::with_capacity(dataset_ids.len());
    for id in dataset_ids {
        let dataset = store
            .get_dataset(DatasetKind::Tabular, *id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("tabular dataset {}", id)))?;
        names.push(dataset.name);
    }
    for id in dataset_ids {
        clean_redundant_tabular_items(store, *id).await?;
    }
    Ok(cleaned_message(&names))
}

/// "Cleaned redundant values for: A, B and C."
pub fn cleaned_message(names: &[String]) -> String {
    match names {
        [] => "Cleaned redundant values for: .".to_string(),
        [only] => format!("Cleaned redundant values for: {}.", only),
        [rest @ .., last] => format!("Cleaned redundant values for: {} and {}.", rest.join(", "), last),
    }
}
