//! Test fixtures and helpers.
//!
//! Builders for the pushes a Tvheadend server sends, and a stocked lineup
//! for integration tests.

use std::sync::Once;

use htsp_sync_core::{Channel, ChannelNumber, Message, MessageKind, Program};
use htsp_sync_store::MemoryStore;

/// Build the `channelAdd` push for `channel`.
pub fn channel_add(channel: &Channel) -> Message {
    let msg = Message::default()
        .with("method", MessageKind::ChannelAdd.as_method())
        .with("channelId", channel.original_network_id.get())
        .with("channelNumber", channel.number.major)
        .with("channelName", channel.name.as_str());

    let msg = if channel.number.minor != 0 {
        msg.with("channelNumberMinor", channel.number.minor)
    } else {
        msg
    };

    match &channel.icon {
        Some(icon) => msg.with("channelIcon", icon.as_str()),
        None => msg,
    }
}

/// Build the `eventAdd` push for `program`.
pub fn event_add(program: &Program) -> Message {
    let mut msg = Message::default()
        .with("method", MessageKind::EventAdd.as_method())
        .with("eventId", program.event_id)
        .with("channelId", program.channel.get())
        .with("start", program.start)
        .with("stop", program.stop)
        .with("title", program.title.as_str());

    if let Some(summary) = &program.summary {
        msg = msg.with("summary", summary.as_str());
    }
    if let Some(description) = &program.description {
        msg = msg.with("description", description.as_str());
    }
    msg
}

pub fn initial_sync_completed() -> Message {
    Message::default()
        .with("method", MessageKind::InitialSyncCompleted.as_method())
}

/// A small lineup: channels, one program per channel, and a seeded store.
pub struct LineupFixture {
    pub channels: Vec<Channel>,
    pub programs: Vec<Program>,
}

impl LineupFixture {
    /// `count` channels numbered 1..=count with ids starting at 1001.
    pub fn new(count: u32) -> Self {
        let channels: Vec<Channel> = (1..=count)
            .map(|n| Channel::new(1000 + n, n, format!("Channel {}", n)))
            .collect();
        let programs = channels
            .iter()
            .enumerate()
            .map(|(i, c)| program(c, 1_700_000_000 + i as i64 * 1800, "News"))
            .collect();

        Self { channels, programs }
    }

    /// The three-channel lineup used by most end-to-end tests.
    pub fn three() -> Self {
        Self {
            channels: vec![
                Channel::new(101, 1, "One").with_icon("imagecache/1"),
                Channel::new(102, 2, "Two"),
                Channel::new(103, 3, "Three HD").with_number(ChannelNumber::new(3, 1)),
            ],
            programs: vec![
                program_on(101, 1, 1_700_000_000, "Breakfast"),
                program_on(102, 2, 1_700_000_000, "Cartoons"),
                program_on(103, 3, 1_700_003_600, "Film"),
            ],
        }
    }

    pub fn pushes(&self) -> Vec<Message> {
        self.channels
            .iter()
            .map(channel_add)
            .chain(self.programs.iter().map(event_add))
            .collect()
    }

    /// A memory store already holding this lineup's channels.
    pub fn seeded_store(&self) -> MemoryStore {
        MemoryStore::with_channels(self.channels.iter().cloned())
    }
}

/// A one-hour program on `channel`.
pub fn program(channel: &Channel, start: i64, title: &str) -> Program {
    Program {
        event_id: channel.original_network_id.get() * 100 + (start % 100) as u32,
        channel: channel.original_network_id,
        start,
        stop: start + 3600,
        title: title.into(),
        summary: None,
        description: None,
    }
}

fn program_on(channel: u32, event_id: u32, start: i64, title: &str) -> Program {
    Program {
        event_id,
        channel: channel.into(),
        start,
        stop: start + 3600,
        title: title.into(),
        summary: Some(format!("{} summary", title)),
        description: None,
    }
}

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_add_projects_back() {
        let channel = Channel::new(7, 7, "Seven HD")
            .with_number(ChannelNumber::new(7, 1))
            .with_icon("imagecache/7");
        assert_eq!(Channel::from_message(&channel_add(&channel)).unwrap(), channel);
    }

    #[test]
    fn test_event_add_projects_back() {
        let lineup = LineupFixture::three();
        for program in &lineup.programs {
            assert_eq!(&Program::from_message(&event_add(program)).unwrap(), program);
        }
    }

    #[test]
    fn test_lineup_numbering() {
        let lineup = LineupFixture::new(4);
        let ids: Vec<u32> = lineup
            .channels
            .iter()
            .map(|c| c.original_network_id.get())
            .collect();
        assert_eq!(ids, vec![1001, 1002, 1003, 1004]);
        assert_eq!(lineup.pushes().len(), 8);
        assert_eq!(lineup.seeded_store().channel_count().unwrap(), 4);
    }

    #[test]
    fn test_completion_message() {
        assert_eq!(
            initial_sync_completed().kind(),
            Some(MessageKind::InitialSyncCompleted)
        );
    }
}
