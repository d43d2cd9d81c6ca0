use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use services::services::{
    avatar::{Progress, UploadStage, UploadStatus},
    profile::UploadCaption,
};
use tokio::{sync::watch, task::JoinHandle};

/// Draws the uploader's status until the returned handle is aborted.
pub fn follow_upload(mut status: watch::Receiver<UploadStatus>) -> (ProgressBar, JoinHandle<()>) {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let drawn = bar.clone();
    let handle = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            render(&drawn, current);
        }
    });
    (bar, handle)
}

fn render(bar: &ProgressBar, status: UploadStatus) {
    match status.stage {
        UploadStage::Idle | UploadStage::Validating => bar.set_message("Checking file"),
        UploadStage::Done => bar.set_message("Done"),
        _ => bar.set_message(UploadCaption::for_progress(status.progress).text()),
    }
    if let Progress::Percent(pct) = status.progress {
        bar.set_position(u64::from(pct));
    }
}
