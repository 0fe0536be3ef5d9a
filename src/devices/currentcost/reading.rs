use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

pub const MAX_CHANNELS: u8 = 8;

/// Tag/value pairs found inside one `<chN>` element, usually just `watts`.
pub type ChannelData = BTreeMap<String, String>;

/// Per-channel readings of a usage report, keyed by channel index 1..=8,
/// together with the sensor number the device reports them under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMap {
    sensor_num: u32,
    entries: BTreeMap<u8, ChannelData>,
}

impl ChannelMap {
    pub fn new(sensor_num: u32) -> Self {
        Self {
            sensor_num,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, index: u8, data: ChannelData) {
        self.entries.insert(index, data);
    }

    pub fn sensor_num(&self) -> u32 {
        self.sensor_num
    }

    pub fn get(&self, index: u8) -> Option<&ChannelData> {
        self.entries.get(&index)
    }

    pub fn watts(&self, index: u8) -> Option<&str> {
        self.get(index)?.get("watts").map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &ChannelData)> {
        self.entries.iter().map(|(index, data)| (*index, data))
    }

    /// Channels 1, 2, ... up to (not including) the first index that is
    /// missing or carries no `watts` value. Anything after that gap is
    /// never reported.
    pub fn contiguous_watts(&self) -> Vec<(u8, &str)> {
        (1..=MAX_CHANNELS)
            .map_while(|index| self.watts(index).map(|watts| (index, watts)))
            .collect()
    }
}

/// One usage report from the display unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub device_version: Option<String>,
    pub sensor_num: Option<u32>,
    pub radio_id: Option<String>,
    pub poll_time: Option<String>,
    pub temperature: Option<String>,
    pub channels: ChannelMap,
    pub raw_message: String,
    pub received_at: DateTime<Utc>,
}

impl Reading {
    pub fn number_channels(&self) -> usize {
        self.channels.contiguous_watts().len()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());

        writeln!(f, "Device Version : {}", show(&self.device_version))?;
        writeln!(f, "Sensor Number : {}", self.sensor_num.map(|n| n.to_string()).unwrap_or_else(|| "-".into()))?;
        writeln!(f, "Sensor Radio ID : {}", show(&self.radio_id))?;
        writeln!(f, "Poll Time : {}", show(&self.poll_time))?;
        writeln!(f, "Temperature : {}", show(&self.temperature))?;
        writeln!(f, "Channel Readings :")?;
        if self.channels.is_empty() {
            writeln!(f, "\tNone")?;
        }
        for (index, data) in self.channels.iter() {
            writeln!(f, "\t{} = {:?}", index, data)?;
        }
        write!(f, "XML Response : {}", self.raw_message)
    }
}
