use chrono::NaiveDate;
use poputka_shared::{Role, StartTime};
use serde::{Deserialize, Deserializer};

/// Accepted date layouts, tried in order. The first that parses wins.
pub const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d.%m.%Y", "%d.%m.%y", "%d-%m-%Y"];

/// Parses a calendar date in one of [`DATE_FORMATS`].
///
/// `%Y` has to be written with four digits: chrono would otherwise read
/// `27.12.25` as the year 25 instead of falling through to `%y`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS.iter().find_map(|fmt| {
        if !year_width_matches(text, fmt) {
            return None;
        }
        NaiveDate::parse_from_str(text, fmt).ok()
    })
}

fn year_width_matches(text: &str, fmt: &str) -> bool {
    let sep = if fmt.contains('.') { '.' } else { '-' };
    let parts: Vec<&str> = text.split(sep).collect();
    if parts.len() != 3 {
        return false;
    }
    if fmt.starts_with("%Y") {
        parts[0].len() == 4
    } else if fmt.ends_with("%Y") {
        parts[2].len() == 4
    } else {
        parts[2].len() <= 2
    }
}

/// Structured extraction handed over by the language-understanding service
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RideCandidate {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub origin: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub destination: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub date: Option<String>,
    #[serde(default, alias = "time", deserialize_with = "blank_as_none")]
    pub start_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_seats")]
    pub seats: Option<i64>,
    /// Assistant text left over after the structured block was cut out
    #[serde(default, alias = "raw_text")]
    pub reply: Option<String>,
}

/// Validated candidate, ready to become a ride
#[derive(Debug, Clone, PartialEq)]
pub struct RideDraft {
    pub role: Role,
    pub origin: String,
    pub destination: String,
    pub ride_date: NaiveDate,
    pub start_time: StartTime,
    pub seats: i32,
}

/// Why a candidate cannot be persisted. Not an error condition: the user is
/// simply asked to try again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CandidateGap {
    #[error("origin is missing")]
    MissingOrigin,
    #[error("destination is missing")]
    MissingDestination,
    #[error("date is missing")]
    MissingDate,
    #[error("unrecognized date: {0}")]
    UnparseableDate(String),
    #[error("seat count must be between 1 and {max}, got {got}")]
    InvalidSeats { got: i64, max: i32 },
}

/// Upper bound on seats a single message can claim
pub const MAX_SEATS: i32 = 8;

impl RideCandidate {
    pub fn into_draft(self, role: Role) -> Result<RideDraft, CandidateGap> {
        let origin = self.origin.ok_or(CandidateGap::MissingOrigin)?;
        let destination = self.destination.ok_or(CandidateGap::MissingDestination)?;
        let date = self.date.ok_or(CandidateGap::MissingDate)?;
        let ride_date = parse_date(&date).ok_or(CandidateGap::UnparseableDate(date))?;

        let seats = match self.seats {
            None => role.default_seats(),
            Some(n) if (1..=MAX_SEATS as i64).contains(&n) => n as i32,
            Some(n) => {
                return Err(CandidateGap::InvalidSeats {
                    got: n,
                    max: MAX_SEATS,
                })
            }
        };

        Ok(RideDraft {
            role,
            origin: origin.trim().to_string(),
            destination: destination.trim().to_string(),
            ride_date,
            start_time: StartTime::from_text(self.start_time.as_deref()),
            seats,
        })
    }

    /// Splits a raw assistant reply into the structured candidate and the text
    /// meant for the user.
    ///
    /// The structured part is the widest `{...}` span ending at the last `}`
    /// that parses, so a trailing block wins over earlier braces in the prose.
    /// Without one the whole reply is plain text. Markdown fences and a
    /// leftover `json` marker are stripped from what remains, and a remainder
    /// that still looks like a JSON object is dropped.
    pub fn from_assistant_reply(reply: &str) -> RideCandidate {
        let mut candidate = RideCandidate::default();
        let mut text = reply.to_string();

        if let Some(end) = reply.rfind('}') {
            let found = reply[..end]
                .match_indices('{')
                .map(|(start, _)| &reply[start..=end])
                .find_map(|block| {
                    serde_json::from_str::<RideCandidate>(block)
                        .ok()
                        .map(|parsed| (block, parsed))
                });
            if let Some((block, parsed)) = found {
                candidate = parsed;
                text = reply.replacen(block, "", 1);
            }
        }

        let cleaned = clean_reply(&text);
        candidate.reply = if cleaned.is_empty() { None } else { Some(cleaned) };
        candidate
    }
}

fn clean_reply(text: &str) -> String {
    let mut out = String::new();
    let mut in_fence = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            // a fence line opens or closes a block; anything inside is code
            in_fence = !in_fence && !trimmed[3..].contains("```");
            continue;
        }
        if in_fence || trimmed.eq_ignore_ascii_case("json") || trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }

    if out.starts_with('{') && out.ends_with('}') {
        return String::new();
    }
    out
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("none") || t.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(t.to_string())
            }
        }
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_seats<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
