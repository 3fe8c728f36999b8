use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const TEMPLATE: &str = "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec} ({eta})";

/// Byte progress bar on stderr, or a hidden one when `visible` is false
pub fn transfer_bar(filename: &str, total: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
    let style = ProgressStyle::with_template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_message(filename.to_string());
    bar
}
