//! Calendar-day grouping of a message sequence.

use std::collections::BTreeMap;

use chrono::{Local, NaiveDate, TimeZone};
use serde::Serialize;
use tether_protocol::Message;

pub const TODAY: &str = "Today";
pub const YESTERDAY: &str = "Yesterday";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateGroup {
    pub date: NaiveDate,
    pub label: String,
    pub messages: Vec<Message>,
}

/// Bucket messages by their calendar date in `tz`, ascending by date.
///
/// Messages keep their sequence order inside a bucket.
pub fn group_by_date<Tz: TimeZone>(messages: &[Message], today: NaiveDate, tz: &Tz) -> Vec<DateGroup> {
    let mut buckets: BTreeMap<NaiveDate, Vec<Message>> = BTreeMap::new();
    for message in messages {
        let date = message.created_at.with_timezone(tz).date_naive();
        buckets.entry(date).or_default().push(message.clone());
    }
    buckets
        .into_iter()
        .map(|(date, messages)| DateGroup {
            date,
            label: day_label(date, today),
            messages,
        })
        .collect()
}

/// [`group_by_date`] in the machine's local time zone.
pub fn group_by_local_date(messages: &[Message]) -> Vec<DateGroup> {
    group_by_date(messages, Local::now().date_naive(), &Local)
}

pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        TODAY.to_string()
    } else if today.pred_opt() == Some(date) {
        YESTERDAY.to_string()
    } else {
        date.format("%B %-d, %Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::at;
    use chrono::{FixedOffset, Utc};
    use tether_protocol::Direction;

    fn msg(text: &str, ts: &str) -> Message {
        Message {
            id: text.to_string(),
            conversation_id: "c-1".to_string(),
            direction: Direction::Inbound,
            text: text.to_string(),
            created_at: at(ts),
            read: false,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn groups_by_day_with_relative_labels() {
        let messages = vec![
            msg("hi", "2024-01-15T10:00:00Z"),
            msg("bye", "2024-01-15T18:00:00Z"),
            msg("morning", "2024-01-16T09:00:00Z"),
        ];

        let groups = group_by_date(&messages, date(2024, 1, 17), &Utc);
        let shape: Vec<(&str, Vec<&str>)> = groups
            .iter()
            .map(|g| {
                (
                    g.label.as_str(),
                    g.messages.iter().map(|m| m.text.as_str()).collect(),
                )
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                ("January 15, 2024", vec!["hi", "bye"]),
                ("Yesterday", vec!["morning"]),
            ]
        );
    }

    #[test]
    fn uses_the_given_time_zone() {
        let messages = vec![msg("late", "2024-01-16T03:00:00Z")];
        let new_york = FixedOffset::west_opt(5 * 3600).expect("offset");

        let groups = group_by_date(&messages, date(2024, 1, 16), &new_york);
        assert_eq!(groups[0].date, date(2024, 1, 15));
        assert_eq!(groups[0].label, YESTERDAY);
    }

    #[test]
    fn out_of_order_input_sorts_groups_but_not_bucket_contents() {
        let messages = vec![
            msg("b", "2024-01-17T12:00:00Z"),
            msg("a", "2024-01-10T12:00:00Z"),
            msg("c", "2024-01-17T08:00:00Z"),
        ];
        let groups = group_by_date(&messages, date(2024, 1, 17), &Utc);
        assert_eq!(groups[0].label, "January 10, 2024");
        assert_eq!(groups[1].label, TODAY);
        let today: Vec<&str> = groups[1].messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(today, vec!["b", "c"]);
    }

    #[test]
    fn empty_sequence_has_no_groups() {
        assert!(group_by_date(&[], date(2024, 1, 17), &Utc).is_empty());
    }
}
