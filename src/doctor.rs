use serde::Serialize;

/// A physician as listed on a search results card.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Doctor {
    pub name: String,
    pub specialty: Option<String>,
    pub profile_url: Option<String>,
    pub image_url: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub has_multiple_locations: bool,
    pub is_employed_provider: bool,
    pub is_accepting_new_patients: bool,
    pub rating: Option<f64>,
    pub rating_count: Option<i32>,
}

impl Doctor {
    #[cfg(test)]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A rating of zero means the provider has not been rated.
    pub fn has_rating(&self) -> bool {
        self.rating.map_or(false, |rating| rating > 0.0)
    }

    /// Profile URL usable as an upsert key.
    pub fn profile_key(&self) -> Option<&str> {
        self.profile_url.as_deref().filter(|url| !url.is_empty())
    }
}

/// A [`Doctor`] as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctorRecord {
    pub id: i32,
    #[serde(flatten)]
    pub doctor: Doctor,
}
