//! Row classification into typed events
//!
//! Row mode `M` becomes a [`Passing`], `S` a [`StatusPing`], anything else is
//! kept as [`Event::Unrecognized`] so the caller can count and drop it.
//! Rows missing a field the event cannot exist without are rejected with a
//! [`RowParseError`]; the rest of the batch is unaffected.

use crate::domain::row::{split_rows, Row};
use crate::domain::types::{column, ChipId, DeviceId, Event, Passing, RowMode, StatusPing};
use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::time::Instant;
use tracing::debug;

/// Battery field is `-` separated, the level is the last segment
const BATTERY_SEPARATOR: char = '-';

/// Battery level reported when the row carries no battery field
pub const DEFAULT_BATTERY_LEVEL: &str = "0";

const TIME_OF_DAY_FORMAT: &str = "%H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowParseError {
    #[error("missing field '{0}'")]
    MissingField(char),
    #[error("invalid time of day '{0}'")]
    InvalidTime(String),
}

/// Per-tick inputs the classifier needs besides the row itself
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext {
    /// Timezone the feed reports time-of-day in
    pub event_tz: Tz,
    /// Start of the poll window; anchors the calendar date of passings
    pub reference: DateTime<Utc>,
    /// Wall-clock time the payload was received
    pub received_wall: DateTime<Utc>,
    pub received_at: Instant,
}

/// Classified contents of one feed payload
#[derive(Debug, Default)]
pub struct Batch {
    pub passings: Vec<Passing>,
    pub statuses: Vec<StatusPing>,
    pub rows: usize,
    pub skipped: usize,
    pub unrecognized: usize,
}

/// Last `-` separated segment of the battery field, or the default level
pub fn battery_level(raw: Option<&str>) -> String {
    match raw {
        Some(raw) => raw.rsplit(BATTERY_SEPARATOR).next().unwrap_or(raw).to_string(),
        None => DEFAULT_BATTERY_LEVEL.to_string(),
    }
}

/// Combine a feed time-of-day with the calendar date nearest to `reference`.
///
/// The feed only reports time-of-day. Taking the date from the poll window
/// (rather than from "today") keeps rows dated correctly when the window
/// straddles local midnight.
pub fn resolve_event_timestamp(
    time: NaiveTime,
    tz: Tz,
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let reference_local = reference.with_timezone(&tz).naive_local();
    let date = reference_local.date();

    let nearest: NaiveDateTime = [date.pred_opt(), Some(date), date.succ_opt()]
        .into_iter()
        .flatten()
        .map(|d| d.and_time(time))
        .min_by_key(|candidate| (*candidate - reference_local).num_seconds().abs())?;

    // DST gap yields None, overlap resolves to the earlier instant
    tz.from_local_datetime(&nearest).earliest().map(|dt| dt.with_timezone(&Utc))
}

/// Classify a single parsed row
pub fn classify_row(row: &Row<'_>, ctx: &ClassifyContext) -> Result<Event, RowParseError> {
    let mode = row.field(column::ROW_MODE).ok_or(RowParseError::MissingField(column::ROW_MODE))?;

    match mode.parse::<RowMode>() {
        Ok(RowMode::Passing) => classify_passing(row, ctx).map(Event::Passing),
        Ok(RowMode::Status) => classify_status(row, ctx).map(Event::Status),
        Ok(RowMode::Other(other)) => Ok(Event::Unrecognized(other)),
        Err(never) => match never {},
    }
}

fn classify_passing(row: &Row<'_>, ctx: &ClassifyContext) -> Result<Passing, RowParseError> {
    let device_id = required(row, column::DEVICE_ID)?;
    let chip = required(row, column::CHIP)?;
    let raw_time = required(row, column::TIME_OF_DAY)?;

    let time = NaiveTime::parse_from_str(raw_time, TIME_OF_DAY_FORMAT)
        .map_err(|_| RowParseError::InvalidTime(raw_time.to_string()))?;
    let event_timestamp = resolve_event_timestamp(time, ctx.event_tz, ctx.reference)
        .ok_or_else(|| RowParseError::InvalidTime(raw_time.to_string()))?;

    Ok(Passing {
        device_id: DeviceId::from(device_id),
        chip: ChipId::from(chip),
        code: row.field(column::CODE).map(str::to_string),
        event_timestamp,
        received_at: ctx.received_at,
    })
}

fn classify_status(row: &Row<'_>, ctx: &ClassifyContext) -> Result<StatusPing, RowParseError> {
    let device_id = required(row, column::DEVICE_ID)?;

    Ok(StatusPing {
        device_id: DeviceId::from(device_id),
        code: row.field(column::CODE).map(str::to_string),
        battery_level: battery_level(row.field(column::BATTERY_LEVEL)),
        received_at: ctx.received_at,
        updated: ctx.received_wall,
    })
}

fn required<'a>(row: &Row<'a>, tag: char) -> Result<&'a str, RowParseError> {
    match row.field(tag) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(RowParseError::MissingField(tag)),
    }
}

/// Parse and classify every row of a feed payload
pub fn classify_payload(payload: &str, ctx: &ClassifyContext) -> Batch {
    let mut batch = Batch::default();

    for line in split_rows(payload) {
        batch.rows += 1;
        let row = Row::parse(line);

        match classify_row(&row, ctx) {
            Ok(Event::Passing(p)) => batch.passings.push(p),
            Ok(Event::Status(s)) => batch.statuses.push(s),
            Ok(Event::Unrecognized(mode)) => {
                debug!(mode = %mode, "row_mode_unrecognized");
                batch.unrecognized += 1;
            }
            Err(e) => {
                debug!(error = %e, row = %line, "row_skipped");
                batch.skipped += 1;
            }
        }
    }

    batch
}
