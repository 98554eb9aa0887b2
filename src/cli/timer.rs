use std::io::Write;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    error::TrackerError,
    model::RecordId,
    timer::{Tick, Ticker, TICK_FREQUENCY},
    utils::time::format_clock,
};

use super::{
    output::{print_record_line, print_stats},
    shutdown, App,
};

/// Store failures after a successful transition leave the timer running, so they are reported
/// without failing the command.
fn report_store_error(result: Result<(), TrackerError>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_validation() => Err(e.into()),
        Err(e) => {
            eprintln!("Timer is running but the record store failed: {e}");
            Ok(())
        }
    }
}

pub async fn start(app: &App, activity: &str, category: Option<&str>, detach: bool) -> Result<()> {
    {
        let mut tracker = app.tracker.lock().await;
        tracker.select_activity(activity, category)?;
        report_store_error(tracker.start().await)?;
    }
    if detach {
        println!("Timer started for {activity}");
        return Ok(());
    }
    live_clock(app).await
}

pub async fn resume(app: &App) -> Result<()> {
    if !app.tracker.lock().await.session().is_running() {
        return Err(anyhow!("No running timer to resume"));
    }
    live_clock(app).await
}

pub async fn stop(app: &App) -> Result<()> {
    let mut tracker = app.tracker.lock().await;
    let record = tracker.stop().await?;
    print_record_line(&record, tracker.categories(), false);
    Ok(())
}

pub async fn status(app: &App) -> Result<()> {
    let mut tracker = app.tracker.lock().await;
    match tracker.tick().await {
        Some(elapsed) => {
            let session = tracker.session();
            println!(
                "Running\t{}\t{}\t{}",
                format_clock(elapsed),
                session.activity(),
                session.activity_category()
            );
            if let Some(id) = session.active_record_id() {
                println!("Record\t{id}");
            }
        }
        None => println!("Timer is {}", tracker.session().state()),
    }
    print_stats(&tracker.daily_stats());
    Ok(())
}

pub async fn abandon(app: &App) -> Result<()> {
    app.tracker.lock().await.abandon().await;
    println!("Timer abandoned");
    Ok(())
}

pub async fn continue_record(app: &App, id: RecordId, start: bool) -> Result<()> {
    {
        let mut tracker = app.tracker.lock().await;
        let record = tracker.continue_record(&id, false).await?;
        if !start {
            println!("Record {} can be continued", record.id);
            return Ok(());
        }
        report_store_error(tracker.start().await)?;
    }
    live_clock(app).await
}

/// Redraws the running clock every tick until Ctrl-C or until the timer is stopped by another
/// instance. The timer itself keeps running afterwards.
async fn live_clock(app: &App) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let (sender, mut receiver) = mpsc::channel::<Tick>(4);
    let ticker = Ticker::new(
        sender,
        shutdown_token.clone(),
        TICK_FREQUENCY,
        app.clock.clone(),
    );
    let mut refreshes = app.tracker.lock().await.subscribe(shutdown_token.clone());

    let display = async {
        loop {
            tokio::select! {
                tick = receiver.recv() => {
                    if tick.is_none() {
                        break;
                    }
                    let mut tracker = app.tracker.lock().await;
                    let Some(elapsed) = tracker.tick().await else {
                        println!();
                        println!("Timer was stopped elsewhere");
                        break;
                    };
                    print!("\r{}  {}", format_clock(elapsed), tracker.session().activity());
                    if let Err(e) = std::io::stdout().flush() {
                        warn!("Failed to flush stdout {e}");
                    }
                }
                Some(marker) = refreshes.recv() => {
                    app.tracker.lock().await.on_refresh(&marker).await;
                }
            }
        }
        shutdown_token.cancel();
    };

    let (_, ticker_result, _) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        ticker.run(),
        display,
    );
    if let Err(e) = ticker_result {
        error!("Ticker got an error {e:?}");
    }

    let tracker = app.tracker.lock().await;
    if tracker.session().is_running() {
        tracker.save_snapshot().await;
        println!();
        println!("Timer left running. Use `stop` to finish it or `resume` to watch it again.");
    }
    Ok(())
}
