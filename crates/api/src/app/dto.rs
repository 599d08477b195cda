use serde::Deserialize;

/// Form body of `POST /new-tracker`. Absent fields read as empty strings.
#[derive(Debug, Default, Deserialize)]
pub struct NewTrackerForm {
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub frequency: String,
}

/// Query of `GET /get-result`.
#[derive(Debug, Default, Deserialize)]
pub struct ResultQuery {
    #[serde(default)]
    pub id: String,
}
