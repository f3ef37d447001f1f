//! Operator controls: region reselection, mode toggle and quit.
//!
//! The controller polls at most one event per tick and mutates the tick-loop
//! context directly. Key bindings for the terminal adapter:
//!
//! | key            | action            |
//! |----------------|-------------------|
//! | `c`            | reselect region   |
//! | `m`, tab       | toggle sync/async |
//! | `q`, esc       | quit              |

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::frame::Frame;
use crate::pipeline::PipelineContext;
use crate::region::Region;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    ReselectRegion,
    ToggleMode,
    Quit,
    Unknown,
}

impl InputEvent {
    pub fn from_key(key: &str) -> Self {
        match key {
            "c" | "C" => Self::ReselectRegion,
            "m" | "M" | "\t" | "tab" => Self::ToggleMode,
            "q" | "Q" | "\u{1b}" | "esc" => Self::Quit,
            _ => Self::Unknown,
        }
    }
}

/// Source of operator input. `poll` must not block.
pub trait InputSource: Send {
    fn poll(&mut self) -> Option<InputEvent>;
}

/// Asks the operator for a new region while showing `frame`.
///
/// `Ok(None)` means the selection was cancelled.
pub trait RegionSelector: Send {
    fn select(&mut self, frame: &Frame, current: &Region) -> Result<Option<Region>>;
}

pub struct InteractionController {
    input: Box<dyn InputSource>,
    selector: Box<dyn RegionSelector>,
}

impl InteractionController {
    pub fn new(input: Box<dyn InputSource>, selector: Box<dyn RegionSelector>) -> Self {
        Self { input, selector }
    }

    /// Controller that never reports input.
    pub fn disabled() -> Self {
        Self::new(
            Box::new(ScriptedInput::default()),
            Box::new(ScriptedSelector::default()),
        )
    }

    /// Poll one event and apply it to the context.
    pub fn poll(&mut self, ctx: &mut PipelineContext, shown: &Frame) -> Result<Option<InputEvent>> {
        let Some(event) = self.input.poll() else {
            return Ok(None);
        };
        match event {
            InputEvent::ReselectRegion => match self.selector.select(shown, &ctx.region)? {
                Some(mut region) => {
                    region.apply_defaults(shown.size());
                    ctx.region.replace_with(region);
                    log::info!("ROI updated: {}", ctx.region);
                }
                None => log::info!("ROI selection cancelled, keeping {}", ctx.region),
            },
            InputEvent::ToggleMode => {
                let target = ctx.pending_mode.unwrap_or(ctx.mode).toggled();
                ctx.pending_mode = (target != ctx.mode).then_some(target);
                log::info!("mode switch to {} requested", target);
            }
            InputEvent::Quit => {
                log::info!("quit requested by operator");
                ctx.quit_requested = true;
            }
            InputEvent::Unknown => {}
        }
        Ok(Some(event))
    }
}

/// Pre-recorded input, one entry per tick. `None` entries are idle ticks.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    events: VecDeque<Option<InputEvent>>,
}

impl ScriptedInput {
    pub fn new(events: impl IntoIterator<Item = Option<InputEvent>>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self) -> Option<InputEvent> {
        self.events.pop_front().flatten()
    }
}

/// Pre-recorded selections. Records the index of every frame it was shown.
#[derive(Debug, Default)]
pub struct ScriptedSelector {
    responses: VecDeque<Option<Region>>,
    shown: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedSelector {
    pub fn new(responses: impl IntoIterator<Item = Option<Region>>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            shown: Arc::default(),
        }
    }

    pub fn shown_frames(&self) -> Arc<Mutex<Vec<u64>>> {
        self.shown.clone()
    }
}

impl RegionSelector for ScriptedSelector {
    fn select(&mut self, frame: &Frame, _current: &Region) -> Result<Option<Region>> {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push(frame.index);
        }
        Ok(self.responses.pop_front().flatten())
    }
}

/// Line-oriented terminal console.
///
/// A reader thread forwards stdin lines; the input half polls them without
/// blocking and the selector half blocks for the next line.
pub fn terminal_console() -> (TerminalInput, TerminalSelector) {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("operator console unavailable: {}", e);
    }
    let lines = Arc::new(Mutex::new(rx));
    (
        TerminalInput {
            lines: lines.clone(),
        },
        TerminalSelector { lines },
    )
}

pub struct TerminalInput {
    lines: Arc<Mutex<Receiver<String>>>,
}

impl InputSource for TerminalInput {
    fn poll(&mut self) -> Option<InputEvent> {
        let rx = self.lines.lock().ok()?;
        match rx.try_recv() {
            Ok(line) => {
                // Keep tab and esc intact; trim only line noise.
                let key = line.trim_matches(|c| c == '\r' || c == ' ');
                Some(InputEvent::from_key(key))
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

pub struct TerminalSelector {
    lines: Arc<Mutex<Receiver<String>>>,
}

impl RegionSelector for TerminalSelector {
    fn select(&mut self, frame: &Frame, current: &Region) -> Result<Option<Region>> {
        eprint!(
            "frame {} ({}x{}), current ROI {}\nnew ROI as 'x y w h' (empty to cancel): ",
            frame.index,
            frame.width(),
            frame.height(),
            current
        );
        let _ = std::io::stderr().flush();
        let line = match self.lines.lock() {
            Ok(rx) => rx.recv().ok(),
            Err(_) => None,
        };
        let Some(line) = line else {
            return Ok(None);
        };
        match parse_region(&line) {
            Some(region) => Ok(Some(region)),
            None => {
                if !line.trim().is_empty() {
                    log::warn!("ignoring malformed ROI '{}'", line.trim());
                }
                Ok(None)
            }
        }
    }
}

/// Parse `x y w h` (commas also accepted). Zero width or height cancels, and
/// so does a zone whose far edge overflows pixel coordinates.
pub fn parse_region(text: &str) -> Option<Region> {
    let values: Vec<i32> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match values.as_slice() {
        [x, y, w, h] if *w > 0 && *h > 0 => {
            let region = Region::new(*x, *y, *w, *h);
            region.check_extent().ok().map(|()| region)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::OccupancyCell;
    use crate::scheduler::SchedulingMode;

    fn frame(index: u64) -> Frame {
        Frame::from_rgb(40, 30, vec![0; 40 * 30 * 3], index).unwrap()
    }

    fn context() -> PipelineContext {
        PipelineContext::new(
            Region::new(5, 5, 10, 10),
            SchedulingMode::Async,
            0.5,
            OccupancyCell::default(),
        )
    }

    #[test]
    fn maps_keys_to_events() {
        assert_eq!(InputEvent::from_key("c"), InputEvent::ReselectRegion);
        assert_eq!(InputEvent::from_key("\t"), InputEvent::ToggleMode);
        assert_eq!(InputEvent::from_key("m"), InputEvent::ToggleMode);
        assert_eq!(InputEvent::from_key("\u{1b}"), InputEvent::Quit);
        assert_eq!(InputEvent::from_key("q"), InputEvent::Quit);
        assert_eq!(InputEvent::from_key("x"), InputEvent::Unknown);
    }

    #[test]
    fn reselect_replaces_all_fields_and_cancel_keeps_region() {
        let selector = ScriptedSelector::new([Some(Region::new(1, 2, 3, 4)), None]);
        let shown = selector.shown_frames();
        let mut controller = InteractionController::new(
            Box::new(ScriptedInput::new([
                Some(InputEvent::ReselectRegion),
                Some(InputEvent::ReselectRegion),
            ])),
            Box::new(selector),
        );
        let mut ctx = context();

        controller.poll(&mut ctx, &frame(7)).unwrap();
        assert_eq!(ctx.region, Region::new(1, 2, 3, 4));
        controller.poll(&mut ctx, &frame(8)).unwrap();
        assert_eq!(ctx.region, Region::new(1, 2, 3, 4));
        assert_eq!(*shown.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn toggle_sets_pending_mode_and_double_toggle_cancels() {
        let mut controller = InteractionController::new(
            Box::new(ScriptedInput::new([
                Some(InputEvent::ToggleMode),
                Some(InputEvent::ToggleMode),
            ])),
            Box::new(ScriptedSelector::default()),
        );
        let mut ctx = context();
        controller.poll(&mut ctx, &frame(1)).unwrap();
        assert_eq!(ctx.pending_mode, Some(SchedulingMode::Sync));
        assert_eq!(ctx.mode, SchedulingMode::Async);
        controller.poll(&mut ctx, &frame(2)).unwrap();
        assert_eq!(ctx.pending_mode, None);
    }

    #[test]
    fn one_event_per_poll_and_unknown_is_ignored() {
        let mut controller = InteractionController::new(
            Box::new(ScriptedInput::new([
                Some(InputEvent::Unknown),
                None,
                Some(InputEvent::Quit),
            ])),
            Box::new(ScriptedSelector::default()),
        );
        let mut ctx = context();
        assert_eq!(
            controller.poll(&mut ctx, &frame(1)).unwrap(),
            Some(InputEvent::Unknown)
        );
        assert!(!ctx.quit_requested);
        assert_eq!(controller.poll(&mut ctx, &frame(2)).unwrap(), None);
        controller.poll(&mut ctx, &frame(3)).unwrap();
        assert!(ctx.quit_requested);
        assert_eq!(ctx.region, Region::new(5, 5, 10, 10));
    }

    #[test]
    fn parses_region_text() {
        assert_eq!(parse_region("10 20 30 40"), Some(Region::new(10, 20, 30, 40)));
        assert_eq!(parse_region("10,20, 30,40"), Some(Region::new(10, 20, 30, 40)));
        assert_eq!(parse_region("10 20 0 40"), None);
        assert_eq!(parse_region("10 20 30"), None);
        assert_eq!(parse_region(""), None);
        assert_eq!(parse_region("2147483000 10 1000 10"), None);
        assert_eq!(parse_region("10 2147483000 10 1000"), None);
    }
}
