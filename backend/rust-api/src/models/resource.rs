use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Webcam,
    Microphone,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Webcam => "webcam",
            DeviceKind::Microphone => "microphone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Webcam,
    Microphone,
    Fullscreen,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Webcam => "webcam",
            ResourceKind::Microphone => "microphone",
            ResourceKind::Fullscreen => "fullscreen",
        }
    }

    pub fn device(&self) -> Option<DeviceKind> {
        match self {
            ResourceKind::Webcam => Some(DeviceKind::Webcam),
            ResourceKind::Microphone => Some(DeviceKind::Microphone),
            ResourceKind::Fullscreen => None,
        }
    }
}

impl From<DeviceKind> for ResourceKind {
    fn from(device: DeviceKind) -> Self {
        match device {
            DeviceKind::Webcam => ResourceKind::Webcam,
            DeviceKind::Microphone => ResourceKind::Microphone,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredResources {
    #[serde(default)]
    pub webcam: bool,
    #[serde(default)]
    pub microphone: bool,
    #[serde(default)]
    pub fullscreen: bool,
}

impl RequiredResources {
    /// Required resources in acquisition order.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds = Vec::with_capacity(3);
        if self.webcam {
            kinds.push(ResourceKind::Webcam);
        }
        if self.microphone {
            kinds.push(ResourceKind::Microphone);
        }
        if self.fullscreen {
            kinds.push(ResourceKind::Fullscreen);
        }
        kinds
    }
}

/// Opaque handle for a running capture device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureHandle {
    id: Uuid,
    device: DeviceKind,
}

impl CaptureHandle {
    pub fn new(device: DeviceKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            device,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }
}

/// Opaque still-image or audio sample taken from a capture device.
#[derive(Debug, Clone)]
pub struct CaptureSample {
    pub device: DeviceKind,
    pub captured_at: DateTime<Utc>,
    pub content_type: String,
    pub payload: Vec<u8>,
}

/// Metadata kept by the supervisor view for each periodic sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub id: String,
    pub device: DeviceKind,
    pub captured_at: DateTime<Utc>,
    pub content_type: String,
    pub size_bytes: usize,
}

impl From<&CaptureSample> for SampleRecord {
    fn from(sample: &CaptureSample) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device: sample.device,
            captured_at: sample.captured_at,
            content_type: sample.content_type.clone(),
            size_bytes: sample.payload.len(),
        }
    }
}

/// Side-channel events raised by the resource guard after acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    FullscreenLost {
        at: DateTime<Utc>,
    },
    DeviceLost {
        device: DeviceKind,
        reason: String,
        at: DateTime<Utc>,
    },
}
