//! User records: the raw shape returned by the source, the flat shape
//! published to the topic, and the per-gender enrichment rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user as returned by the record source (`results[0]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUser {
    /// Gender discriminant; may be absent.
    #[serde(default)]
    pub gender: Option<String>,
    pub name: RawName,
    pub location: RawLocation,
    pub email: String,
    pub login: RawLogin,
    pub dob: RawDate,
    pub registered: RawDate,
    pub phone: String,
    pub picture: RawPicture,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawName {
    pub first: String,
    pub last: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
    pub street: RawStreet,
    pub city: String,
    pub state: String,
    pub country: String,
    /// Numeric or alphanumeric depending on the country.
    pub postcode: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStreet {
    pub number: Value,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLogin {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDate {
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPicture {
    pub medium: String,
}

/// Flat user record, as published.
///
/// The enrichment fields are only present once a gender path ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub first_name: String,
    pub last_name: String,
    pub gender: Option<String>,
    pub address: String,
    pub post_code: Value,
    pub email: String,
    pub username: String,
    pub dob: String,
    pub registered_date: String,
    pub phone: String,
    pub picture: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_email: Option<String>,

    #[serde(
        rename = "userCompany",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub user_company: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Render a scalar JSON value without quotes.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl UserRecord {
    /// Normalize a raw user into the flat record.
    pub fn format(raw: RawUser) -> Self {
        let location = raw.location;
        let address = format!(
            "{} {}, {}, {}, {}",
            plain(&location.street.number),
            location.street.name,
            location.city,
            location.state,
            location.country
        );

        Self {
            first_name: raw.name.first,
            last_name: raw.name.last,
            gender: raw.gender,
            address,
            post_code: location.postcode,
            email: raw.email,
            username: raw.login.username,
            dob: raw.dob.date,
            registered_date: raw.registered.date,
            phone: raw.phone,
            picture: raw.picture.medium,
            business_email: None,
            user_company: None,
            id: None,
        }
    }

    /// The routing discriminant of this record.
    pub fn gender(&self) -> Gender {
        Gender::from_discriminant(self.gender.as_deref())
    }

    /// Apply a gender path's enrichment.
    pub fn enrich(mut self, enrichment: &Enrichment) -> Self {
        let local = self
            .email
            .split_once('@')
            .map_or(self.email.as_str(), |(local, _)| local);

        self.business_email = Some(format!("{}@newSet.{}", local, enrichment.domain_suffix));
        self.user_company = Some(format!("{}@newSet", self.username));
        self.id = Some(format!("{}-{}", self.phone, enrichment.id_tag));
        self
    }

    /// Serialize as the flat JSON object sent to the topic.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Routing discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    /// Anything else, including a missing value.
    Unknown,
}

impl Gender {
    /// Classify a raw discriminant. Matching is exact.
    pub fn from_discriminant(value: Option<&str>) -> Self {
        match value {
            Some("male") => Gender::Male,
            Some("female") => Gender::Female,
            _ => Gender::Unknown,
        }
    }
}

/// Per-path enrichment parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enrichment {
    /// Last label of the business email domain.
    pub domain_suffix: &'static str,
    /// Appended to the phone number to form the record id.
    pub id_tag: &'static str,
}

impl Enrichment {
    pub const MALE: Enrichment = Enrichment {
        domain_suffix: "nig",
        id_tag: "0",
    };

    pub const FEMALE: Enrichment = Enrichment {
        domain_suffix: "wom",
        id_tag: "1",
    };
}
