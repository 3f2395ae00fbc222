use serde::{Deserialize, Serialize};

/// A consultant record as exchanged with the REST backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consultant {
    /// Assigned by the backend; absent on records that have not been created yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub available: bool,
}

impl Consultant {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Format the hourly rate for display
    pub fn rate_display(&self) -> String {
        match self.hourly_rate {
            Some(rate) => format!("{:.2}/h", rate),
            None => "-".to_string(),
        }
    }
}
