use anyhow::Result;
pub use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::collections::VecDeque;
use std::time::Duration;

/// Where the app loop reads terminal input from
pub trait EventSource {
    /// Poll for events with a timeout
    fn poll(&mut self, timeout: Duration) -> Result<bool>;

    /// Read the next event
    fn read(&mut self) -> Result<Event>;
}

/// Real keyboard event source using crossterm
pub struct KeyboardEventSource;

impl EventSource for KeyboardEventSource {
    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        Ok(crossterm::event::poll(timeout)?)
    }

    fn read(&mut self) -> Result<Event> {
        Ok(crossterm::event::read()?)
    }
}

/// One scripted step of a simulated session
#[derive(Debug, Clone)]
pub enum Step {
    Input(Event),
    /// Polls that report no input, so the app loop can drain the live feed
    Idle(usize),
}

/// Scripted event source for tests. Sends `q` once the script runs out.
pub struct SimulatedEventSource {
    steps: VecDeque<Step>,
}

impl SimulatedEventSource {
    pub fn new(events: Vec<Event>) -> Self {
        Self::from_steps(events.into_iter().map(Step::Input).collect())
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn key_event(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: crossterm::event::KeyEventState::empty(),
        })
    }

    pub fn char_key(c: char) -> Event {
        Self::key_event(KeyCode::Char(c), KeyModifiers::empty())
    }

    pub fn ctrl_char_key(c: char) -> Event {
        Self::key_event(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    pub fn code_key(code: KeyCode) -> Event {
        Self::key_event(code, KeyModifiers::empty())
    }
}

impl EventSource for SimulatedEventSource {
    fn poll(&mut self, _timeout: Duration) -> Result<bool> {
        match self.steps.front_mut() {
            Some(Step::Idle(remaining)) => {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    self.steps.pop_front();
                }
                Ok(false)
            }
            Some(Step::Input(_)) | None => Ok(true),
        }
    }

    fn read(&mut self) -> Result<Event> {
        loop {
            match self.steps.pop_front() {
                Some(Step::Input(event)) => return Ok(event),
                Some(Step::Idle(_)) => continue,
                None => return Ok(Self::char_key('q')),
            }
        }
    }
}
