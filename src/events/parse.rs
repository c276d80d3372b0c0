//! # Raw line parsing boundary.
//!
//! Sinks can be fed unparsed text lines ([`Event::Raw`]). Turning such a line
//! into a structured event is the job of a [`LineParser`] supplied by the
//! embedding program; when no parser is configured, or it returns `None`, the
//! line reaches [`Sink::on_unrecognized`](crate::Sink::on_unrecognized).

use super::Event;

/// Converts a raw text line into a structured event.
pub trait LineParser: Send + Sync + 'static {
    /// Returns `None` when the line is not recognized.
    ///
    /// Returning another [`Event::Raw`] is treated as "not recognized".
    fn parse(&self, line: &str) -> Option<Event>;
}

impl<F> LineParser for F
where
    F: Fn(&str) -> Option<Event> + Send + Sync + 'static,
{
    fn parse(&self, line: &str) -> Option<Event> {
        self(line)
    }
}
