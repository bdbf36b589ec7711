use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Weekday};
use tracing::info;

use crate::runner::error::{Result, TaskError};
use crate::runner::HandlerContext;

const INPUT: &str = "dates.txt";
const OUTPUT: &str = "dates-count.txt";

/// Weekday names searched in this order: language by language, Monday to
/// Sunday within each. The first name contained in the task wins.
pub static WEEKDAY_NAMES: &[(&str, &[(Weekday, &[&str])])] = &[
    (
        "english",
        &[
            (Weekday::Mon, &["monday"]),
            (Weekday::Tue, &["tuesday"]),
            (Weekday::Wed, &["wednesday"]),
            (Weekday::Thu, &["thursday"]),
            (Weekday::Fri, &["friday"]),
            (Weekday::Sat, &["saturday"]),
            (Weekday::Sun, &["sunday"]),
        ],
    ),
    (
        "spanish",
        &[
            (Weekday::Mon, &["lunes"]),
            (Weekday::Tue, &["martes"]),
            (Weekday::Wed, &["miércoles", "miercoles"]),
            (Weekday::Thu, &["jueves"]),
            (Weekday::Fri, &["viernes"]),
            (Weekday::Sat, &["sábado", "sabado"]),
            (Weekday::Sun, &["domingo"]),
        ],
    ),
    (
        "french",
        &[
            (Weekday::Mon, &["lundi"]),
            (Weekday::Tue, &["mardi"]),
            (Weekday::Wed, &["mercredi"]),
            (Weekday::Thu, &["jeudi"]),
            (Weekday::Fri, &["vendredi"]),
            (Weekday::Sat, &["samedi"]),
            (Weekday::Sun, &["dimanche"]),
        ],
    ),
    (
        "german",
        &[
            (Weekday::Mon, &["montag"]),
            (Weekday::Tue, &["dienstag"]),
            (Weekday::Wed, &["mittwoch"]),
            (Weekday::Thu, &["donnerstag"]),
            (Weekday::Fri, &["freitag"]),
            (Weekday::Sat, &["samstag", "sonnabend"]),
            (Weekday::Sun, &["sonntag"]),
        ],
    ),
    (
        "italian",
        &[
            (Weekday::Mon, &["lunedì", "lunedi"]),
            (Weekday::Tue, &["martedì", "martedi"]),
            (Weekday::Wed, &["mercoledì", "mercoledi"]),
            (Weekday::Thu, &["giovedì", "giovedi"]),
            (Weekday::Fri, &["venerdì", "venerdi"]),
            (Weekday::Sat, &["sabato"]),
            (Weekday::Sun, &["domenica"]),
        ],
    ),
    (
        "portuguese",
        &[
            (Weekday::Mon, &["segunda-feira"]),
            (Weekday::Tue, &["terça-feira", "terca-feira"]),
            (Weekday::Wed, &["quarta-feira"]),
            (Weekday::Thu, &["quinta-feira"]),
            (Weekday::Fri, &["sexta-feira"]),
            (Weekday::Sat, &["sábado", "sabado"]),
            (Weekday::Sun, &["domingo"]),
        ],
    ),
    (
        "dutch",
        &[
            (Weekday::Mon, &["maandag"]),
            (Weekday::Tue, &["dinsdag"]),
            (Weekday::Wed, &["woensdag"]),
            (Weekday::Thu, &["donderdag"]),
            (Weekday::Fri, &["vrijdag"]),
            (Weekday::Sat, &["zaterdag"]),
            (Weekday::Sun, &["zondag"]),
        ],
    ),
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d.%m.%Y",
    "%Y%m%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%b %d, %Y %H:%M:%S",
];

pub fn find_weekday(task: &str) -> Option<(Weekday, &'static str)> {
    let lower = task.to_lowercase();
    WEEKDAY_NAMES.iter().find_map(|(_, days)| {
        days.iter().find_map(|(day, names)| {
            names
                .iter()
                .find(|name| lower.contains(*name))
                .map(|name| (*day, *name))
        })
    })
}

/// Best-effort date parsing across the formats seen in exported data.
pub fn parse_date(line: &str) -> Option<NaiveDate> {
    let s = line.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        })
}

pub fn count_weekday(text: &str, weekday: Weekday) -> usize {
    text.lines()
        .filter_map(parse_date)
        .filter(|d| d.weekday() == weekday)
        .count()
}

pub async fn run(ctx: &HandlerContext, task: &str) -> Result<String> {
    let (weekday, name) = find_weekday(task).ok_or_else(|| {
        TaskError::InvalidArgument("task does not name a weekday".to_string())
    })?;
    let input = ctx.input_file(task, &["txt"], INPUT);
    let text = ctx.workspace.read_to_string(&input).await?;

    let count = count_weekday(&text, weekday);
    ctx.workspace.write(OUTPUT, count.to_string()).await?;

    info!(handler = "count_weekdays", %input, ?weekday, count, output = OUTPUT, "counted dates");
    Ok(format!(
        "Counted {count} dates falling on {name} in {input}; wrote {OUTPUT}"
    ))
}
