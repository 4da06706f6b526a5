//! Start-time normalization.
//!
//! Every zoneless wall-clock value is read as UTC+8 civil time. Only an
//! explicit offset or zone token in the input overrides that, and the host's
//! local zone is never consulted. Precedence:
//!
//! 1. spreadsheet serial numbers (JSON numbers, or numeric strings with at
//!    most six integer digits)
//! 2. explicitly scanned `YYYY-MM-DD[ HH:MM[:SS[.f]]][ AM|PM][ zone]` shapes,
//!    with `/`, `.` or `年月日` separators and `上午`/`下午` before the time
//! 3. a permissive fallback over RFC 3339, RFC 2822 and a few fixed layouts
//!
//! Whatever path produced the instant, its civil year must fall in
//! [`MIN_YEAR`]..=[`MAX_YEAR`].

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, SecondsFormat, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::Serializer;
use serde_json::Value;

use crate::errors::NormalizationFailure;

pub const CIVIL_OFFSET_SECONDS: i32 = 8 * 3600;
pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

const MS_PER_DAY: i64 = 86_400_000;
// 9999-12-31
const MAX_SERIAL: f64 = 2_958_465.0;

const ZONED_FORMATS: &[&str] = &[
    "%a %b %d %Y %H:%M:%S GMT%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%d %b %Y %H:%M:%S %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y%m%d%H%M%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%Y-%m-%d %I:%M:%S %p",
    "%Y-%m-%d %I:%M %p",
    "%Y/%m/%d %I:%M:%S %p",
    "%Y/%m/%d %I:%M %p",
    "%b %d, %Y %H:%M:%S",
    "%b %d %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y%m%d", "%m/%d/%Y", "%b %d, %Y", "%d %b %Y"];

pub fn civil_zone() -> FixedOffset {
    FixedOffset::east_opt(CIVIL_OFFSET_SECONDS).expect("UTC+8 is a valid fixed offset")
}

pub fn to_civil(instant: &DateTime<Utc>) -> DateTime<FixedOffset> {
    instant.with_timezone(&civil_zone())
}

/// `YYYY-MM-DD HH:MM:SS` in civil time.
pub fn render_civil(instant: &DateTime<Utc>) -> String {
    to_civil(instant).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// RFC 3339 with the `+08:00` offset spelled out.
pub fn render_rfc3339(instant: &DateTime<Utc>) -> String {
    to_civil(instant).to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

pub fn serialize_civil<S: Serializer>(
    instant: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&render_rfc3339(instant))
}

pub fn from_civil_wall_clock(naive: NaiveDateTime) -> Result<DateTime<Utc>, String> {
    civil_zone()
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("{naive} cannot be placed in UTC+8"))
}

/// Converts a raw start-time value into an absolute instant.
pub fn normalize(value: &Value) -> Result<DateTime<Utc>, NormalizationFailure> {
    let instant = match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| format!("number {number} is not representable"))
            .and_then(from_spreadsheet_serial),
        Value::String(text) => parse_text(text),
        Value::Null => Err("value is empty".to_string()),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            Err("unsupported value type".to_string())
        }
    }
    .map_err(|reason| NormalizationFailure::new(value, reason))?;

    let year = to_civil(&instant).year();
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(NormalizationFailure::new(
            value,
            format!("resolved year {year} is outside {MIN_YEAR}..={MAX_YEAR}"),
        ));
    }

    Ok(instant)
}

/// Interprets `serial` as days since the spreadsheet epoch, in civil time.
///
/// The integer part counts days, the fraction is the time of day. The value is
/// rounded once to whole milliseconds before being split.
pub fn from_spreadsheet_serial(serial: f64) -> Result<DateTime<Utc>, String> {
    if !serial.is_finite() || !(0.0..=MAX_SERIAL).contains(&serial) {
        return Err(format!(
            "spreadsheet serial {serial} is outside the representable range"
        ));
    }

    let total_ms = (serial * MS_PER_DAY as f64).round() as i64;
    let days = total_ms.div_euclid(MS_PER_DAY);
    let ms_of_day = total_ms.rem_euclid(MS_PER_DAY);

    // The format counts a phantom 1900-02-29 (serial 60), so serials before
    // it are anchored one day later than the rest.
    let origin_day = if days < 60 { 31 } else { 30 };
    let origin = NaiveDate::from_ymd_opt(1899, 12, origin_day)
        .ok_or_else(|| "spreadsheet epoch is not a calendar date".to_string())?;
    let date = origin
        .checked_add_signed(Duration::days(days))
        .ok_or_else(|| format!("spreadsheet serial {serial} overflows the calendar"))?;

    let seconds = (ms_of_day / 1000) as u32;
    let nanos = (ms_of_day % 1000) as u32 * 1_000_000;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
        .ok_or_else(|| format!("spreadsheet serial {serial} has an invalid time of day"))?;

    from_civil_wall_clock(date.and_time(time))
}

fn parse_text(text: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("value is empty".to_string());
    }

    if is_serial_candidate(trimmed) {
        let serial: f64 = trimmed
            .parse()
            .map_err(|_| format!("'{trimmed}' is not a number"))?;
        return from_spreadsheet_serial(serial);
    }

    let explicit_error = match scan_wall_clock(trimmed).map(WallClock::resolve) {
        Some(Ok(instant)) => return Ok(instant),
        Some(Err(reason)) => Some(reason),
        None => None,
    };

    parse_generic(trimmed).ok_or_else(|| {
        explicit_error.unwrap_or_else(|| format!("unrecognized date/time format '{trimmed}'"))
    })
}

fn is_serial_candidate(text: &str) -> bool {
    let (integer, fraction) = match text.split_once('.') {
        Some((integer, fraction)) if !fraction.is_empty() => (integer, fraction),
        Some(_) => return false,
        None => (text, ""),
    };
    !integer.is_empty()
        && integer.len() <= 6
        && integer.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, PartialEq)]
struct WallClock<'a> {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    nanos: u32,
    meridiem: Option<Meridiem>,
    zone: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

impl Meridiem {
    const TOKENS: [(&'static str, Meridiem); 6] = [
        ("上午", Meridiem::Am),
        ("下午", Meridiem::Pm),
        ("a.m.", Meridiem::Am),
        ("p.m.", Meridiem::Pm),
        ("am", Meridiem::Am),
        ("pm", Meridiem::Pm),
    ];

    /// Maps a 1..=12 clock hour onto 0..=23.
    fn to_24h(self, hour: u32) -> Option<u32> {
        if !(1..=12).contains(&hour) {
            return None;
        }
        Some(match self {
            Meridiem::Am => hour % 12,
            Meridiem::Pm => hour % 12 + 12,
        })
    }
}

impl WallClock<'_> {
    fn resolve(self) -> Result<DateTime<Utc>, String> {
        let date = NaiveDate::from_ymd_opt(self.year, self.month, self.day).ok_or_else(|| {
            format!(
                "{:04}-{:02}-{:02} is not a calendar date",
                self.year, self.month, self.day
            )
        })?;
        let hour = match self.meridiem {
            Some(meridiem) => meridiem
                .to_24h(self.hour)
                .ok_or_else(|| format!("{} is not a 12-hour clock hour", self.hour))?,
            None => self.hour,
        };
        let time = NaiveTime::from_hms_nano_opt(hour, self.minute, self.second, self.nanos)
            .ok_or_else(|| {
                format!(
                    "{:02}:{:02}:{:02} is not a valid time of day",
                    self.hour, self.minute, self.second
                )
            })?;
        let zone = parse_zone(self.zone)
            .ok_or_else(|| format!("unrecognized time zone '{}'", self.zone))?;
        zone.localize(date.and_time(time))
    }
}

/// Field-by-field scan of the date shapes spreadsheets emit. Returns `None`
/// when the text does not have that shape at all, including trailing text
/// that is not shaped like a zone.
fn scan_wall_clock(text: &str) -> Option<WallClock<'_>> {
    let mut scanner = Scanner::new(text);

    let year = scanner.digits(4, 4)? as i32;
    let separator = scanner.eat(&['-', '/', '.', '年'])?;
    let month = scanner.digits(1, 2)?;
    let chinese = separator == '年';
    scanner.eat(&[if chinese { '月' } else { separator }])?;
    let day = scanner.digits(1, 2)?;
    if chinese {
        scanner.eat(&['日', '号']);
    }

    let spaced = scanner.skip_whitespace();
    let marked = !spaced && scanner.eat(&['T', 't']).is_some();

    let mut meridiem = if marked { None } else { scanner.meridiem() };
    if meridiem.is_some() {
        scanner.skip_whitespace();
    }

    let (mut hour, mut minute, mut second, mut nanos) = (0, 0, 0, 0);
    if scanner.peek_digit() && (spaced || marked || chinese || meridiem.is_some()) {
        hour = scanner.digits(1, 2)?;
        let colon = scanner.eat(&[':', '时', '点'])?;
        minute = scanner.digits(1, 2)?;
        if colon == ':' {
            if scanner.eat(&[':']).is_some() {
                second = scanner.digits(1, 2)?;
                if scanner.eat(&['.', ',']).is_some() {
                    nanos = scanner.fraction()?;
                }
            }
        } else {
            scanner.eat(&['分']);
            if scanner.peek_digit() {
                second = scanner.digits(1, 2)?;
                scanner.eat(&['秒']);
            }
        }
        if meridiem.is_none() {
            scanner.skip_whitespace();
            meridiem = scanner.meridiem();
        }
    } else if marked || meridiem.is_some() {
        return None;
    }

    let zone = scanner.rest.trim();
    if !is_zone_shaped(zone) {
        return None;
    }

    Some(WallClock {
        year,
        month,
        day,
        hour,
        minute,
        second,
        nanos,
        meridiem,
        zone,
    })
}

/// Anything [`parse_zone`] accepts, or a single token that starts like an
/// offset or names an IANA region.
fn is_zone_shaped(token: &str) -> bool {
    if parse_zone(token).is_some() {
        return true;
    }
    let token = token.trim_matches(['(', '（', '[', ')', '）', ']']);
    !token.contains(char::is_whitespace)
        && (token.starts_with(['+', '-'])
            || strip_prefix_ignore_case(token, "UTC").is_some()
            || strip_prefix_ignore_case(token, "GMT").is_some()
            || token.contains('/'))
}

struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn digits(&mut self, min: usize, max: usize) -> Option<u32> {
        let len = self
            .rest
            .bytes()
            .take(max)
            .take_while(u8::is_ascii_digit)
            .count();
        if len < min {
            return None;
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        head.parse().ok()
    }

    /// Sub-second digits as nanoseconds; digits past the ninth are dropped.
    fn fraction(&mut self) -> Option<u32> {
        let len = self.rest.bytes().take_while(u8::is_ascii_digit).count();
        if len == 0 {
            return None;
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        let kept = &head[..len.min(9)];
        let value: u32 = kept.parse().ok()?;
        Some(value * 10u32.pow((9 - kept.len()) as u32))
    }

    fn eat(&mut self, options: &[char]) -> Option<char> {
        let next = self.rest.chars().next().filter(|c| options.contains(c))?;
        self.rest = &self.rest[next.len_utf8()..];
        Some(next)
    }

    /// `AM`/`PM` (any case, dotted or not) or `上午`/`下午`, unless it is the
    /// start of a longer word.
    fn meridiem(&mut self) -> Option<Meridiem> {
        for (token, meridiem) in Meridiem::TOKENS {
            let Some(head) = self.rest.get(..token.len()) else {
                continue;
            };
            let tail = &self.rest[token.len()..];
            if head.eq_ignore_ascii_case(token)
                && !tail.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            {
                self.rest = tail;
                return Some(meridiem);
            }
        }
        None
    }

    fn peek_digit(&self) -> bool {
        self.rest.bytes().next().is_some_and(|b| b.is_ascii_digit())
    }

    fn skip_whitespace(&mut self) -> bool {
        let trimmed = self.rest.trim_start();
        let skipped = trimmed.len() != self.rest.len();
        self.rest = trimmed;
        skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Zone {
    Civil,
    Fixed(FixedOffset),
    Named(Tz),
}

impl Zone {
    fn localize(self, naive: NaiveDateTime) -> Result<DateTime<Utc>, String> {
        match self {
            Zone::Civil => from_civil_wall_clock(naive),
            Zone::Fixed(offset) => offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| format!("{naive} cannot be placed in {offset}")),
            Zone::Named(tz) => match tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
                LocalResult::Ambiguous(a, b) => {
                    let off_a = a.offset().fix().local_minus_utc();
                    let off_b = b.offset().fix().local_minus_utc();
                    let chosen = if off_a >= off_b { a } else { b };
                    Ok(chosen.with_timezone(&Utc))
                }
                LocalResult::None => Err(format!("{naive} does not exist in {tz}")),
            },
        }
    }
}

fn parse_zone(token: &str) -> Option<Zone> {
    let token = token
        .trim()
        .trim_start_matches(['(', '（', '['])
        .trim_end_matches([')', '）', ']'])
        .trim();

    if token.is_empty() {
        return Some(Zone::Civil);
    }
    if matches!(token, "北京时间" | "北京") {
        return Some(Zone::Fixed(civil_zone()));
    }
    if ["z", "utc", "gmt"].iter().any(|name| token.eq_ignore_ascii_case(name)) {
        return Some(Zone::Fixed(Utc.fix()));
    }

    let offset_text = strip_prefix_ignore_case(token, "UTC")
        .or_else(|| strip_prefix_ignore_case(token, "GMT"))
        .unwrap_or(token);
    if offset_text.starts_with(['+', '-']) {
        return parse_offset(offset_text).map(Zone::Fixed);
    }

    token.parse::<Tz>().ok().map(Zone::Named)
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &text[prefix.len()..])
}

/// `+8`, `+08`, `+0800`, `+08:00` and their negative forms.
fn parse_offset(text: &str) -> Option<FixedOffset> {
    let (sign, body) = if let Some(rest) = text.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = text.strip_prefix('-') {
        (-1, rest)
    } else {
        return None;
    };

    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return None;
    }

    let (hours, minutes) = match body.split_once(':') {
        Some((hours, minutes)) => (hours, minutes),
        None if body.len() == 4 => body.split_at(2),
        None if body.len() <= 2 => (body, "0"),
        None => return None,
    };

    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_generic(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }

    // Date.prototype.toString() appends "(China Standard Time)" and similar
    let without_comment = text.split(" (").next().unwrap_or(text).trim();
    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(without_comment, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return from_civil_wall_clock(naive).ok();
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return from_civil_wall_clock(date.and_time(NaiveTime::MIN)).ok();
        }
    }

    None
}
