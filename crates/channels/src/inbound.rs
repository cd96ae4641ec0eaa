//! Inbound keyword commands sent by users to the business number.

use campaign_core::types::InboundCommand;

/// A parsed inbound message. `command` is `None` for free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender address with any channel prefix removed.
    pub sender: String,
    pub command: Option<InboundCommand>,
    pub topic: Option<String>,
}

/// Parse a message body into a command. Keywords are case-insensitive and
/// topics are normalised to upper case.
pub fn parse_inbound(from: &str, body: &str) -> InboundMessage {
    let sender = from.trim();
    let sender = sender.strip_prefix("whatsapp:").unwrap_or(sender).to_string();
    let normalized = body.trim().to_uppercase();

    let (command, topic) = match normalized.split_once(char::is_whitespace) {
        None if normalized == "START" => (Some(InboundCommand::Start), None),
        None if normalized == "STOP" => (Some(InboundCommand::Stop), None),
        Some((keyword, rest)) => {
            let topic = rest.trim().to_string();
            match keyword {
                "SUBSCRIBE" if !topic.is_empty() => (Some(InboundCommand::Subscribe), Some(topic)),
                "UNSUBSCRIBE" if !topic.is_empty() => {
                    (Some(InboundCommand::Unsubscribe), Some(topic))
                }
                _ => (None, None),
            }
        }
        None => (None, None),
    };

    InboundMessage {
        sender,
        command,
        topic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_case_insensitive() {
        let msg = parse_inbound("whatsapp:+15550001111", "  stop ");
        assert_eq!(msg.sender, "+15550001111");
        assert_eq!(msg.command, Some(InboundCommand::Stop));
        assert_eq!(parse_inbound("+1555", "Start").command, Some(InboundCommand::Start));
    }

    #[test]
    fn test_subscribe_with_topic() {
        let msg = parse_inbound("whatsapp:+15550001111", "subscribe promotions");
        assert_eq!(msg.command, Some(InboundCommand::Subscribe));
        assert_eq!(msg.topic.as_deref(), Some("PROMOTIONS"));

        let msg = parse_inbound("+15550001111", "UNSUBSCRIBE   news");
        assert_eq!(msg.command, Some(InboundCommand::Unsubscribe));
        assert_eq!(msg.topic.as_deref(), Some("NEWS"));
    }

    #[test]
    fn test_free_text_and_bare_keywords_are_not_commands() {
        assert_eq!(parse_inbound("+1555", "hello there").command, None);
        assert_eq!(parse_inbound("+1555", "SUBSCRIBE").command, None);
        assert_eq!(parse_inbound("+1555", "STOP please").command, None);
        assert_eq!(parse_inbound("+1555", "").command, None);
    }
}
