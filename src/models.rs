// Message model for emergency traffic
// A Message is fixed at construction; only the hop counter moves afterwards

use chrono::{Local, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::codec::FIELD_DELIMITER;
use crate::error::{ParseError, ValidationError};

/// The four kinds of traffic carried over the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Regular,
    Emergency,
    Sos,
    Relay,
}

impl MessageType {
    pub const ALL: [MessageType; 4] = [
        MessageType::Regular,
        MessageType::Emergency,
        MessageType::Sos,
        MessageType::Relay,
    ];

    /// Token used for this type on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Regular => "REGULAR",
            MessageType::Emergency => "EMERGENCY",
            MessageType::Sos => "SOS",
            MessageType::Relay => "RELAY",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ParseError;

    // Exact, case-sensitive match against the wire tokens
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::UnknownType(s.to_string()))
    }
}

/// Local delivery state of an outgoing message
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DeliveryStatus {
    Sending = 0,
    Sent = 1,
    Delivered = 2,
    Read = 3,
}

impl DeliveryStatus {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DeliveryStatus::Sending),
            1 => Some(DeliveryStatus::Sent),
            2 => Some(DeliveryStatus::Delivered),
            3 => Some(DeliveryStatus::Read),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            DeliveryStatus::Sending => "⏳",
            DeliveryStatus::Sent => "✔",
            DeliveryStatus::Delivered | DeliveryStatus::Read => "✔✔",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeliveryStatus::Sending => "Sending...",
            DeliveryStatus::Sent => "Sent",
            DeliveryStatus::Delivered => "Delivered",
            DeliveryStatus::Read => "Read",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: String,
    sender_id: Option<String>,
    recipient_id: Option<String>,
    content: String,
    message_type: MessageType,
    latitude: f64,
    longitude: f64,
    timestamp: i64,
    hop_count: u32,
    relay_path: Vec<String>,
}

impl Message {
    /// Create a message stamped with a fresh id and the current time
    pub fn new(message_type: MessageType, content: impl Into<String>) -> Self {
        Self::with_timestamp(message_type, content, Utc::now().timestamp_millis())
    }

    /// Create a message with an explicit creation time (epoch milliseconds)
    pub fn with_timestamp(message_type: MessageType, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: None,
            recipient_id: None,
            content: content.into(),
            message_type,
            latitude: 0.0,
            longitude: 0.0,
            timestamp,
            hop_count: 0,
            relay_path: Vec::new(),
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender_id.as_deref()
    }

    pub fn recipient_id(&self) -> Option<&str> {
        self.recipient_id.as_deref()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn hop_count(&self) -> u32 {
        self.hop_count
    }

    pub fn relay_path(&self) -> &[String] {
        &self.relay_path
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self.message_type, MessageType::Emergency | MessageType::Sos)
    }

    /// `(0, 0)` doubles as "no location"; a fix exactly there is indistinguishable
    pub fn has_location(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }

    pub fn increment_hop_count(&mut self) {
        self.hop_count = self.hop_count.saturating_add(1);
    }

    /// Copy of this message after one more hop through `hop`
    pub fn relayed_by(&self, hop: impl Into<String>) -> Message {
        let mut relay_path = self.relay_path.clone();
        relay_path.push(hop.into());
        let mut relayed = Message {
            relay_path,
            ..self.clone()
        };
        relayed.increment_hop_count();
        relayed
    }

    pub fn location_string(&self) -> String {
        if self.has_location() {
            format!("{:.6}, {:.6}", self.latitude, self.longitude)
        } else {
            "No location".to_string()
        }
    }

    pub fn maps_url(&self) -> Option<String> {
        self.has_location()
            .then(|| format!("https://www.google.com/maps?q={},{}", self.latitude, self.longitude))
    }

    pub fn formatted_timestamp(&self) -> String {
        match Local.timestamp_millis_opt(self.timestamp).single() {
            Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => self.timestamp.to_string(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.message_type)?;
        if self.is_emergency() {
            f.write_str("🚨 ")?;
        }
        f.write_str(&self.content)?;
        if self.has_location() {
            write!(f, " 📍 {}", self.location_string())?;
        }
        write!(f, " ({})", self.formatted_timestamp())?;
        if self.hop_count > 0 {
            write!(f, " [Relayed {}x]", self.hop_count)?;
        }
        Ok(())
    }
}

/// Check outgoing content before it reaches the codec
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if let Some(c) = content.chars().find(|c| *c == FIELD_DELIMITER || *c == '\r' || *c == '\n') {
        return Err(ValidationError::ContainsDelimiter(c));
    }
    Ok(())
}
