use ansi_term::{Colour, Style};
use chrono::{DateTime, Local, Utc};

use crate::{
    model::{CategoryRegistry, DailyStats, Record, StyleToken},
    sync::Pagination,
    utils::time::format_duration,
};

fn style_of(token: StyleToken) -> Style {
    match token {
        StyleToken::WorkOutput => Colour::Blue.bold(),
        StyleToken::Charge => Colour::Green.bold(),
        StyleToken::Rest => Colour::Purple.bold(),
        StyleToken::Create => Colour::Yellow.bold(),
        StyleToken::Gap => Colour::Cyan.bold(),
        StyleToken::Entertainment => Colour::White.dimmed(),
    }
}

fn local_time(v: Option<DateTime<Utc>>, format: &str) -> String {
    v.map(|v| v.with_timezone(&Local).format(format).to_string())
        .unwrap_or_else(|| "--".into())
}

/// One line per record: id, time range, duration, coloured activity.
pub fn print_record_line(record: &Record, registry: &CategoryRegistry, show_date: bool) {
    let format = if show_date { "%x %H:%M" } else { "%H:%M" };
    let style = style_of(registry.style_for(&record.activity, Some(&record.activity_category)));
    println!(
        "{}\t{}-{}\t{}\t{}\t{}",
        record.id,
        local_time(record.start_time(), format),
        local_time(record.end_time(), "%H:%M"),
        format_duration(record.duration()),
        style.paint(&record.activity),
        record.activity_category,
    );
}

pub fn print_records(records: &[Record], registry: &CategoryRegistry) {
    if records.is_empty() {
        println!("No records");
        return;
    }
    for record in records {
        print_record_line(record, registry, false);
    }
}

pub fn print_record_detail(record: &Record, registry: &CategoryRegistry) {
    let style = style_of(registry.style_for(&record.activity, Some(&record.activity_category)));
    println!("{}", style.paint(&record.activity));
    println!("id\t\t{}", record.id);
    println!("category\t{}", record.activity_category);
    println!("start\t\t{}", local_time(record.start_time(), "%x %H:%M:%S"));
    println!("end\t\t{}", local_time(record.end_time(), "%x %H:%M:%S"));
    println!("duration\t{}", format_duration(record.duration()));
    println!("time span\t{}", format_duration(record.time_span()));
    println!("pauses\t\t{}", record.pause_count());
    if !record.remark.is_empty() {
        println!("remark\t\t{}", record.remark);
    }
    let emotions = record.emotion_tags();
    if !emotions.is_empty() {
        println!("emotion\t\t{}", emotions.join(" | "));
    }
    println!("segments");
    for (index, segment) in record.segments().iter().enumerate() {
        println!(
            "  {index}\t{} - {}\t{}",
            local_time(segment.start, "%x %H:%M:%S"),
            local_time(segment.end, "%H:%M:%S"),
            format_duration(segment.length()),
        );
    }
}

pub fn print_stats(stats: &DailyStats) {
    println!(
        "Today: {} across {} records",
        format_duration(stats.total),
        stats.activity_count
    );
}

pub fn print_pagination(pagination: &Pagination) {
    println!(
        "Page {}/{} ({} records)",
        pagination.page,
        pagination.pages.max(1),
        pagination.total
    );
}

pub fn print_categories(registry: &CategoryRegistry) {
    for category in registry.categories() {
        let token = registry.style_for_category(&category.name);
        println!("{}\t{}", style_of(token).paint(&category.name), token);
        for activity in &category.activities {
            println!("  {activity}");
        }
    }
}
