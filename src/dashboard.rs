//! Live progress dashboard.
//!
//! The board keeps a fixed-size window of channel slots. Once the window is
//! full, a newly admitted channel takes over a finished slot instead of
//! growing the list, so the screen always shows the current batch. Redraws
//! are throttled through a [`Debouncer`] and always repaint the whole frame.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossterm::{
    cursor,
    style::Print,
    terminal::{self, ClearType},
    queue,
};
use tracing::debug;
use unicode_width::UnicodeWidthStr;

use crate::debounce::Debouncer;
use crate::model::ChannelProgress;

/// Names are padded to at least this many terminal columns.
pub const MIN_NAME_WIDTH: usize = 52;

type Output = Box<dyn Write + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct StatusBoard {
    name: String,
    capacity: usize,
    slots: Mutex<Vec<Arc<ChannelProgress>>>,
    log_text: Mutex<String>,
    draw_timer: Debouncer,
    output: Mutex<Output>,
    frames: AtomicU64,
}

impl StatusBoard {
    /// Board drawing to stdout.
    pub fn new(name: impl Into<String>, capacity: usize, throttle: Duration) -> Self {
        Self::with_output(name, capacity, throttle, Box::new(io::stdout()))
    }

    pub fn with_output(
        name: impl Into<String>,
        capacity: usize,
        throttle: Duration,
        output: Output,
    ) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            slots: Mutex::new(Vec::new()),
            log_text: Mutex::new(String::new()),
            draw_timer: Debouncer::new(throttle),
            output: Mutex::new(output),
            frames: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Put a channel on screen and return its slot index.
    pub fn admit(&self, progress: Arc<ChannelProgress>) -> usize {
        let mut slots = lock(&self.slots);

        if slots.len() >= self.capacity {
            if let Some(index) = slots.iter().rposition(|slot| slot.is_finished()) {
                slots[index] = progress;
                return index;
            }
            debug!(
                channel = %progress.channel().name,
                "No finished slot to reuse, growing the window"
            );
        }

        slots.push(progress);
        slots.len() - 1
    }

    pub fn slots(&self) -> Vec<Arc<ChannelProgress>> {
        lock(&self.slots).clone()
    }

    /// Append a diagnostic line shown below the slot table.
    pub fn log(&self, line: impl AsRef<str>) {
        let mut text = lock(&self.log_text);
        text.push_str(line.as_ref());
        text.push('\n');
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Build the text of one frame.
    pub fn render_frame(&self) -> String {
        let slots = self.slots();
        let widest = slots
            .iter()
            .map(|slot| slot.channel().name.width())
            .fold(MIN_NAME_WIDTH, usize::max);

        let mut text = format!(
            "We're generating a full dump for {}, please wait\n",
            self.name
        );

        for slot in &slots {
            let channel = slot.channel();
            let kind = if channel.is_direct_message() { "DM" } else { "CH" };
            let status = if slot.is_finished() {
                "DONE".to_string()
            } else {
                format!("{:03}", slot.fetched())
            };

            text.push_str(&format!(
                "[{}] {} [{}]\n",
                kind,
                pad_to_width(&channel.name, widest),
                status
            ));
        }

        text.push_str(&lock(&self.log_text));
        text
    }

    /// Repaint the full frame now.
    pub fn draw(&self) -> io::Result<()> {
        let frame = self.render_frame();
        let mut out = lock(&self.output);
        queue!(
            out,
            cursor::Hide,
            cursor::MoveTo(0, 0),
            terminal::Clear(ClearType::FromCursorDown),
            Print(frame)
        )?;
        out.flush()?;
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Request a redraw; bursts within the throttle window collapse into one.
    pub fn schedule_draw(self: &Arc<Self>) {
        let board = Arc::downgrade(self);
        self.draw_timer.schedule(move || {
            if let Some(board) = board.upgrade() {
                if let Err(err) = board.draw() {
                    debug!("Dashboard draw failed: {}", err);
                }
            }
        });
    }

    /// Drop any pending redraw, paint the final frame and show the cursor.
    pub fn finish(&self) -> io::Result<()> {
        self.draw_timer.cancel();
        self.draw()?;
        let mut out = lock(&self.output);
        queue!(out, cursor::Show)?;
        out.flush()
    }
}

/// Pad `text` with spaces to `width` terminal columns. Wide characters count
/// as two columns.
pub fn pad_to_width(text: &str, width: usize) -> String {
    let pad = width.saturating_sub(text.width());
    let mut padded = String::with_capacity(text.len() + pad);
    padded.push_str(text);
    padded.extend(std::iter::repeat(' ').take(pad));
    padded
}
