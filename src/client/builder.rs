//! Field-by-field construction of a [`Ticket`] payload.
//!
//! In interactive mode every field is prompted for and re-asked until it
//! parses. In script mode lines are read silently from the script and the
//! first bad value aborts the build.

use crate::model::{
    Coordinates, Person, Ticket, TicketType, MAX_DISCOUNT, MIN_COORDINATE_Y,
};
use chrono::{Local, NaiveDate};
use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Interactive,
    Script,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("input ended before the ticket was complete")]
    EndOfInput,
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

type Parsed<T> = Result<T, String>;

pub struct TicketBuilder<'a> {
    input: &'a mut dyn BufRead,
    output: &'a mut dyn Write,
    mode: InputMode,
}

impl<'a> TicketBuilder<'a> {
    pub fn new(input: &'a mut dyn BufRead, output: &'a mut dyn Write, mode: InputMode) -> Self {
        Self {
            input,
            output,
            mode,
        }
    }

    /// Read every client-supplied field. `id` and `creation_date` are
    /// placeholders the server overwrites.
    pub fn build(&mut self) -> Result<Ticket, BuildError> {
        let name = self.ask("name", "name", parse_name)?;
        let x = self.ask("coordinates.x", "x coordinate (number)", parse_x)?;
        let y = self.ask("coordinates.y", "y coordinate (integer > -471)", parse_y)?;
        let price = self.ask("price", "price (> 0)", parse_price)?;
        let discount = self.ask("discount", "discount (1..=100)", parse_discount)?;
        let refundable = self.ask(
            "refundable",
            "refundable (true/false, empty if unknown)",
            parse_refundable,
        )?;
        let type_prompt = format!(
            "ticket type ({})",
            TicketType::ALL.map(|t| t.as_str()).join(", ")
        );
        let ticket_type = self.ask("ticket_type", &type_prompt, parse_ticket_type)?;
        let birthday = self.ask(
            "person.birthday",
            "birthday (YYYY-MM-DD, empty if unknown)",
            parse_birthday,
        )?;
        let height = self.ask("person.height", "height (> 0)", parse_height)?;
        let weight = self.ask("person.weight", "weight (> 0)", parse_weight)?;

        Ok(Ticket {
            id: 0,
            name,
            coordinates: Coordinates { x, y },
            creation_date: Local::now(),
            price,
            discount,
            refundable,
            ticket_type,
            person: Person {
                birthday,
                height,
                weight,
            },
        })
    }

    fn ask<T>(
        &mut self,
        field: &'static str,
        prompt: &str,
        parse: fn(&str) -> Parsed<T>,
    ) -> Result<T, BuildError> {
        loop {
            if self.mode == InputMode::Interactive {
                write!(self.output, "  {prompt}: ")?;
                self.output.flush()?;
            }

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(BuildError::EndOfInput);
            }

            match parse(line.trim()) {
                Ok(value) => return Ok(value),
                Err(reason) if self.mode == InputMode::Interactive => {
                    writeln!(self.output, "  {reason}, try again")?;
                }
                Err(reason) => return Err(BuildError::Invalid { field, reason }),
            }
        }
    }
}

fn parse_name(s: &str) -> Parsed<String> {
    if s.is_empty() {
        return Err("name must not be empty".to_string());
    }
    Ok(s.to_string())
}

fn parse_x(s: &str) -> Parsed<f32> {
    match s.parse::<f32>() {
        Ok(x) if x.is_finite() => Ok(x),
        _ => Err(format!("'{s}' is not a number")),
    }
}

fn parse_y(s: &str) -> Parsed<i32> {
    let y: i32 = s.parse().map_err(|_| format!("'{s}' is not an integer"))?;
    if y <= MIN_COORDINATE_Y {
        return Err(format!("y must be greater than {MIN_COORDINATE_Y}"));
    }
    Ok(y)
}

fn parse_price(s: &str) -> Parsed<f64> {
    match s.parse::<f64>() {
        Ok(p) if p.is_finite() && p > 0.0 => Ok(p),
        Ok(_) => Err("price must be positive".to_string()),
        Err(_) => Err(format!("'{s}' is not a number")),
    }
}

fn parse_discount(s: &str) -> Parsed<i64> {
    let d: i64 = s.parse().map_err(|_| format!("'{s}' is not an integer"))?;
    if d <= 0 || d > MAX_DISCOUNT {
        return Err(format!("discount must be in 1..={MAX_DISCOUNT}"));
    }
    Ok(d)
}

fn parse_refundable(s: &str) -> Parsed<Option<bool>> {
    match s.to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "yes" | "y" => Ok(Some(true)),
        "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(format!("'{s}' is not true or false")),
    }
}

fn parse_ticket_type(s: &str) -> Parsed<TicketType> {
    s.parse().map_err(|_| format!("'{s}' is not a ticket type"))
}

fn parse_birthday(s: &str) -> Parsed<Option<NaiveDate>> {
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| format!("'{s}' is not a YYYY-MM-DD date"))
}

fn parse_height(s: &str) -> Parsed<i64> {
    match s.parse::<i64>() {
        Ok(h) if h > 0 => Ok(h),
        Ok(_) => Err("height must be positive".to_string()),
        Err(_) => Err(format!("'{s}' is not an integer")),
    }
}

fn parse_weight(s: &str) -> Parsed<i32> {
    match s.parse::<i32>() {
        Ok(w) if w > 0 => Ok(w),
        Ok(_) => Err("weight must be positive".to_string()),
        Err(_) => Err(format!("'{s}' is not an integer")),
    }
}
