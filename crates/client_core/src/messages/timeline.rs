use chrono::{NaiveDate, TimeZone};

use super::model::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayGroup {
    pub day: NaiveDate,
    pub messages: Vec<Message>,
}

/// Groups messages by calendar day in `tz`. Days ascend; within a day
/// messages ascend by `created_at`, equal timestamps keep input order.
pub fn group_by_day<'a, Tz, I>(messages: I, tz: &Tz) -> Vec<DayGroup>
where
    Tz: TimeZone,
    I: IntoIterator<Item = &'a Message>,
{
    let mut ordered: Vec<&Message> = messages.into_iter().collect();
    // sort_by_key is stable
    ordered.sort_by_key(|message| message.created_at);

    let mut groups: Vec<DayGroup> = Vec::new();
    for message in ordered {
        let day = message.created_at.with_timezone(tz).date_naive();
        match groups.last_mut() {
            Some(group) if group.day == day => group.messages.push(message.clone()),
            _ => groups.push(DayGroup {
                day,
                messages: vec![message.clone()],
            }),
        }
    }
    groups
}

pub fn day_label(day: NaiveDate, today: NaiveDate) -> String {
    if day == today {
        return "Today".to_string();
    }
    if today.pred_opt() == Some(day) {
        return "Yesterday".to_string();
    }
    day.format("%A, %B %-d, %Y").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shared::domain::{ConversationId, MessageKind, UserId};

    use super::*;
    use crate::messages::model::TempId;

    fn message_at(content: &str, secs: i64) -> Message {
        let at = Utc.timestamp_opt(secs, 0).single().expect("valid timestamp");
        Message::pending(
            TempId::new(),
            ConversationId::new("c1"),
            UserId::new("u1"),
            content.to_string(),
            MessageKind::Text,
            at,
        )
    }

    #[test]
    fn groups_days_ascending_with_stable_ties() {
        let day_two = 86_400 * 2 + 100;
        let messages = vec![
            message_at("late", day_two),
            message_at("tie-a", 86_400 + 50),
            message_at("tie-b", 86_400 + 50),
            message_at("early", 86_400 + 10),
        ];

        let groups = group_by_day(&messages, &Utc);
        assert_eq!(groups.len(), 2);
        let first: Vec<_> = groups[0].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(first, vec!["early", "tie-a", "tie-b"]);
        assert_eq!(groups[1].messages[0].content, "late");
        assert!(groups[0].day < groups[1].day);
    }

    #[test]
    fn labels_relative_days() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).expect("date");
        assert_eq!(day_label(today, today), "Today");
        assert_eq!(
            day_label(NaiveDate::from_ymd_opt(2026, 3, 9).expect("date"), today),
            "Yesterday"
        );
        assert_eq!(
            day_label(NaiveDate::from_ymd_opt(2026, 1, 5).expect("date"), today),
            "Monday, January 5, 2026"
        );
    }
}
