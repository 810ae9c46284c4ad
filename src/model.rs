//! Ticket record model shared by the server and the client.
//!
//! Records travel inside requests (as payloads) and responses (as result
//! sets), and are stored in the server's collection. Field constraints are
//! checked by [`Ticket::validate`]; the server assigns `id` and
//! `creation_date`, so those are not validated on incoming payloads.

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Lower bound (exclusive) for `Coordinates::y`.
pub const MIN_COORDINATE_Y: i32 = -471;

/// Upper bound (inclusive) for `Ticket::discount`.
pub const MAX_DISCOUNT: i64 = 100;

/// A ticket stored in the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i32,
    pub name: String,
    pub coordinates: Coordinates,
    pub creation_date: DateTime<Local>,
    pub price: f64,
    pub discount: i64,
    pub refundable: Option<bool>,
    pub ticket_type: TicketType,
    pub person: Person,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub birthday: Option<NaiveDate>,
    pub height: i64,
    pub weight: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketType {
    Vip,
    Usual,
    Budgetary,
    Cheap,
}

impl TicketType {
    pub const ALL: [TicketType; 4] = [
        TicketType::Vip,
        TicketType::Usual,
        TicketType::Budgetary,
        TicketType::Cheap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::Vip => "VIP",
            TicketType::Usual => "USUAL",
            TicketType::Budgetary => "BUDGETARY",
            TicketType::Cheap => "CHEAP",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::new("ticket_type", "unknown ticket type"))
    }
}

/// A field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

impl Coordinates {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.x.is_finite() {
            return Err(ValidationError::new("coordinates.x", "must be a finite number"));
        }
        if self.y <= MIN_COORDINATE_Y {
            return Err(ValidationError::new("coordinates.y", "must be greater than -471"));
        }
        Ok(())
    }
}

impl Person {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height <= 0 {
            return Err(ValidationError::new("person.height", "must be positive"));
        }
        if self.weight <= 0 {
            return Err(ValidationError::new("person.weight", "must be positive"));
        }
        Ok(())
    }
}

impl Ticket {
    /// Check the client-supplied fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "must not be empty"));
        }
        self.coordinates.validate()?;
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ValidationError::new("price", "must be a positive number"));
        }
        if self.discount <= 0 || self.discount > MAX_DISCOUNT {
            return Err(ValidationError::new("discount", "must be in 1..=100"));
        }
        self.person.validate()
    }

    /// Check every field, including the server-assigned id.
    pub fn validate_stored(&self) -> Result<(), ValidationError> {
        if self.id <= 0 {
            return Err(ValidationError::new("id", "must be positive"));
        }
        self.validate()
    }

    /// Natural order of the collection: ascending price, then id.
    pub fn natural_cmp(&self, other: &Self) -> Ordering {
        self.price
            .total_cmp(&other.price)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({}) at ({}, {}) price={} discount={}% refundable={} created={} {}",
            self.id,
            self.name,
            self.ticket_type,
            self.coordinates.x,
            self.coordinates.y,
            self.price,
            self.discount,
            self.refundable
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            self.creation_date.format("%Y-%m-%d %H:%M:%S"),
            self.person,
        )
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "person[height={}, weight={}", self.height, self.weight)?;
        if let Some(birthday) = self.birthday {
            write!(f, ", birthday={birthday}")?;
        }
        f.write_str("]")
    }
}

impl PartialOrd for Person {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(
            self.height
                .cmp(&other.height)
                .then_with(|| self.weight.cmp(&other.weight))
                .then_with(|| self.birthday.cmp(&other.birthday)),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_ticket(id: i32, name: &str, price: f64) -> Ticket {
        Ticket {
            id,
            name: name.to_string(),
            coordinates: Coordinates { x: 1.5, y: 10 },
            creation_date: Local::now(),
            price,
            discount: 10,
            refundable: Some(true),
            ticket_type: TicketType::Usual,
            person: Person {
                birthday: NaiveDate::from_ymd_opt(1990, 1, 1),
                height: 180,
                weight: 75,
            },
        }
    }

    #[test]
    fn test_valid_ticket() {
        assert!(sample_ticket(1, "concert", 50.0).validate_stored().is_ok());
    }

    #[test]
    fn test_invalid_fields() {
        let mut t = sample_ticket(1, "  ", 50.0);
        assert_eq!(t.validate().unwrap_err().field, "name");

        t.name = "ok".into();
        t.coordinates.y = -471;
        assert_eq!(t.validate().unwrap_err().field, "coordinates.y");

        t.coordinates.y = -470;
        t.price = 0.0;
        assert_eq!(t.validate().unwrap_err().field, "price");

        t.price = 1.0;
        t.discount = 101;
        assert_eq!(t.validate().unwrap_err().field, "discount");

        t.discount = 100;
        t.person.weight = 0;
        assert_eq!(t.validate().unwrap_err().field, "person.weight");
    }

    #[test]
    fn test_server_assigned_id_required_when_stored() {
        let t = sample_ticket(0, "concert", 50.0);
        assert!(t.validate().is_ok());
        assert_eq!(t.validate_stored().unwrap_err().field, "id");
    }

    #[test]
    fn test_natural_order() {
        let cheap = sample_ticket(2, "a", 5.0);
        let pricey = sample_ticket(1, "b", 50.0);
        let cheap_later = sample_ticket(3, "c", 5.0);
        assert_eq!(cheap.natural_cmp(&pricey), Ordering::Less);
        assert_eq!(cheap.natural_cmp(&cheap_later), Ordering::Less);
    }

    #[test]
    fn test_ticket_type_parse() {
        assert_eq!("vip".parse::<TicketType>().unwrap(), TicketType::Vip);
        assert_eq!(" Cheap ".parse::<TicketType>().unwrap(), TicketType::Cheap);
        assert!("gold".parse::<TicketType>().is_err());
    }
}
