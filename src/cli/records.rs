use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::{
    model::{record::join_emotions, RecordId},
    utils::time::parse_duration,
};

use super::{
    dates::{parse_instant, DateStyle, DATE_HELP},
    output::{print_categories, print_record_detail, print_records, print_stats},
    shutdown, App,
};

#[derive(Debug, Subcommand)]
pub enum SegmentCommand {
    #[command(about = "Add a finished segment. Either give an end or a duration like 1h30m")]
    Add {
        id: String,
        #[arg(help = DATE_HELP)]
        start: String,
        #[arg(help = "End of the segment, or a duration such as 45m, 1.5h or 1h30m")]
        end: String,
        #[arg(long, default_value_t = DateStyle::Uk)]
        date_style: DateStyle,
    },
    #[command(about = "Remove the segment at an index shown by `show`")]
    Remove { id: String, index: usize },
    #[command(about = "Replace the bounds of the segment at an index shown by `show`")]
    Edit {
        id: String,
        index: usize,
        #[arg(help = DATE_HELP)]
        start: String,
        #[arg(help = DATE_HELP)]
        end: String,
        #[arg(long, default_value_t = DateStyle::Uk)]
        date_style: DateStyle,
    },
}

#[derive(Debug, Parser)]
pub struct EditCommand {
    id: String,
    #[arg(long)]
    activity: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    remark: Option<String>,
    #[arg(long, help = "Emotion tag. Repeat for several, pass an empty value to clear")]
    emotion: Vec<String>,
    #[arg(long)]
    pause_count: Option<u32>,
}

pub async fn list(app: &App) -> Result<()> {
    let tracker = app.tracker.lock().await;
    print_records(tracker.records(), tracker.categories());
    print_stats(&tracker.daily_stats());
    Ok(())
}

pub async fn show(app: &App, id: RecordId) -> Result<()> {
    let mut tracker = app.tracker.lock().await;
    let record = tracker.select_record(&id).await?;
    print_record_detail(&record, tracker.categories());
    Ok(())
}

pub async fn delete(app: &App, id: RecordId) -> Result<()> {
    app.tracker.lock().await.delete_record(&id).await?;
    println!("Deleted {id}");
    Ok(())
}

pub async fn process_segment_command(app: &App, command: SegmentCommand) -> Result<()> {
    let now = Local::now();
    let mut tracker = app.tracker.lock().await;
    let record = match command {
        SegmentCommand::Add {
            id,
            start,
            end,
            date_style,
        } => {
            let start = parse_instant(&start, now, date_style, "start")?;
            let end = match parse_duration(&end) {
                Some(duration) => start + duration,
                None => parse_instant(&end, now, date_style, "end")?,
            };
            tracker.add_segment(&id.into(), start, end).await?
        }
        SegmentCommand::Remove { id, index } => tracker.remove_segment(&id.into(), index).await?,
        SegmentCommand::Edit {
            id,
            index,
            start,
            end,
            date_style,
        } => {
            let start = parse_instant(&start, now, date_style, "start")?;
            let end = parse_instant(&end, now, date_style, "end")?;
            tracker.edit_segment(&id.into(), index, start, end).await?
        }
    };
    print_record_detail(&record, tracker.categories());
    Ok(())
}

pub async fn edit(
    app: &App,
    EditCommand {
        id,
        activity,
        category,
        remark,
        emotion,
        pause_count,
    }: EditCommand,
) -> Result<()> {
    let id = RecordId::from(id);
    let mut tracker = app.tracker.lock().await;
    let mut metadata = tracker.select_record(&id).await?.metadata();
    if let Some(activity) = activity {
        metadata.activity = activity;
    }
    if let Some(category) = category {
        metadata.activity_category = category;
    }
    if let Some(remark) = remark {
        metadata.remark = remark;
    }
    if !emotion.is_empty() {
        metadata.emotion = join_emotions(emotion.iter().map(String::as_str));
    }
    if let Some(pause_count) = pause_count {
        metadata.pause_count = pause_count;
    }
    let record = tracker.edit_metadata(&id, metadata).await?;
    print_record_detail(&record, tracker.categories());
    Ok(())
}

pub async fn set_username(app: &mut App, name: &str) -> Result<()> {
    app.tracker.lock().await.set_username(name).await?;
    app.settings.update_username(name.trim())?;
    println!("Now recording as {}", name.trim());
    Ok(())
}

pub async fn categories(app: &App) -> Result<()> {
    print_categories(app.tracker.lock().await.categories());
    Ok(())
}

/// Prints the records, then again after every change made by another instance, until Ctrl-C.
pub async fn watch(app: &App) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let mut refreshes = {
        let tracker = app.tracker.lock().await;
        print_records(tracker.records(), tracker.categories());
        tracker.subscribe(shutdown_token.clone())
    };

    let printer = async {
        while let Some(marker) = refreshes.recv().await {
            let mut tracker = app.tracker.lock().await;
            tracker.on_refresh(&marker).await;
            println!();
            println!("Changed by {}", marker.source_page);
            print_records(tracker.records(), tracker.categories());
        }
        shutdown_token.cancel();
    };

    tokio::join!(shutdown::detect_shutdown(shutdown_token.clone()), printer);
    Ok(())
}
