use anyhow::Result;
use chrono::Local;
use clap::Parser;
use futures::{pin_mut, StreamExt};
use now::DateTimeNow;

use crate::sync::RecordQuery;

use super::{
    dates::{parse_day, DateStyle, DATE_HELP},
    output::{print_pagination, print_record_line},
    App,
};

#[derive(Debug, Parser)]
pub struct HistoryCommand {
    #[arg(long = "start", short, help = format!("First day to include. {DATE_HELP}"))]
    start_date: Option<String>,
    #[arg(long = "end", short, help = format!("Last day to include. {DATE_HELP}"))]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(long, conflicts_with = "start_date", help = "Start from Monday of the current week")]
    week: bool,
    #[arg(long, help = "Text to look for in activity and remark")]
    search: Option<String>,
    #[arg(long, short)]
    activity: Option<String>,
    #[arg(long)]
    emotion: Option<String>,
    #[arg(long, short, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    per_page: u32,
    #[arg(long, conflicts_with = "page", help = "Print every matching record instead of one page")]
    all: bool,
}

pub async fn process_history_command(
    app: &App,
    HistoryCommand {
        start_date,
        end_date,
        date_style,
        week,
        search,
        activity,
        emotion,
        page,
        per_page,
        all,
    }: HistoryCommand,
) -> Result<()> {
    let now = Local::now();
    let date_from = match start_date {
        Some(value) => Some(parse_day(&value, now, date_style, "start")?),
        None if week => Some(now.beginning_of_week().date_naive()),
        None => None,
    };
    let date_to = end_date
        .map(|value| parse_day(&value, now, date_style, "end"))
        .transpose()?;

    let query = RecordQuery {
        page: page.max(1),
        per_page: per_page.max(1),
        search,
        date_from,
        date_to,
        activity,
        emotion,
    };

    let tracker = app.tracker.lock().await;
    if all {
        let records = tracker.history_stream(query);
        pin_mut!(records);
        let mut count = 0usize;
        while let Some(record) = records.next().await {
            print_record_line(&record?, tracker.categories(), true);
            count += 1;
        }
        println!("{count} records");
        return Ok(());
    }

    let page = tracker.history(&query).await?;
    for record in &page.records {
        print_record_line(record, tracker.categories(), true);
    }
    print_pagination(&page.pagination);
    Ok(())
}
