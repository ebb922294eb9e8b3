//! Builders for observation and photo records.

use crate::domain::{ObservationRecord, PhotoRecord};

/// Research-grade observation by `diver` with the given taxon.
pub fn observation(id: u64, taxon_id: Option<u64>, taxon_name: Option<&str>) -> ObservationRecord {
    ObservationRecord {
        id,
        created_at: "2025-05-04T10:00:00+02:00".to_owned(),
        updated_at: "2025-05-04T10:00:00+02:00".to_owned(),
        taxon_id,
        taxon_name: taxon_name.map(str::to_owned),
        user_id: Some(12),
        user_login: "diver".to_owned(),
        quality_grade: "research".to_owned(),
        ..ObservationRecord::default()
    }
}

/// Photo `photos_id` attached to observation `id`.
pub fn photo(photos_id: u64, id: u64) -> PhotoRecord {
    PhotoRecord {
        photos_id,
        id,
        photo_url: format!("https://static.example.org/photos/{photos_id}/medium.jpg"),
        license: Some("cc-by".to_owned()),
        user_login: "diver".to_owned(),
    }
}
