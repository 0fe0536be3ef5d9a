use chrono::Utc;
use log::{debug, trace};
use roxmltree::{Document, Node};

use super::reading::{ChannelData, ChannelMap, Reading, MAX_CHANNELS};
use crate::utils::error::ParseError;

const TAG_VERSION: &str = "src";
const TAG_SENSOR: &str = "sensor";
const TAG_RADIO_ID: &str = "id";
const TAG_TIME: &str = "time";
const TAG_TEMPERATURE_F: &str = "tmprF";
const TAG_TEMPERATURE_C: &str = "tmpr";

/// Turns one framed usage report into a [`Reading`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadingParser;

impl ReadingParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, framed: &str) -> Result<Reading, ParseError> {
        let doc = Document::parse(framed)?;
        let root = doc.root();

        let device_version = single_tag_contents(root, TAG_VERSION)?;
        let sensor_num = single_tag_contents(root, TAG_SENSOR)?
            .map(|value| {
                value.trim().parse::<u32>().map_err(|_| ParseError::InvalidNumber {
                    tag: TAG_SENSOR.to_string(),
                    value,
                })
            })
            .transpose()?;
        let radio_id = single_tag_contents(root, TAG_RADIO_ID)?;
        let poll_time = single_tag_contents(root, TAG_TIME)?;
        // Units displaying Celsius report <tmpr> instead of <tmprF>
        let temperature = match single_tag_contents(root, TAG_TEMPERATURE_F)? {
            Some(value) => Some(value),
            None => single_tag_contents(root, TAG_TEMPERATURE_C)?,
        };

        let mut channels = ChannelMap::new(sensor_num.unwrap_or(0));
        for index in 1..=MAX_CHANNELS {
            let tag = format!("ch{}", index);
            if let Some(data) = nested_tag_contents(root, &tag)? {
                debug!("Channel info : {} = {:?}", tag, data);
                channels.insert(index, data);
            }
        }

        Ok(Reading {
            device_version,
            sensor_num,
            radio_id,
            poll_time,
            temperature,
            channels,
            raw_message: framed.to_string(),
            received_at: Utc::now(),
        })
    }
}

/// The single element named `tag` below `scope`, if any.
fn find_unique<'a, 'input>(scope: Node<'a, 'input>, tag: &str) -> Result<Option<Node<'a, 'input>>, ParseError> {
    let mut found = scope
        .descendants()
        .skip(1)
        .filter(|node| node.is_element() && node.has_tag_name(tag));

    let first = found.next();
    if found.next().is_some() {
        return Err(ParseError::DuplicateTag(tag.to_string()));
    }
    Ok(first)
}

fn single_tag_contents(scope: Node, tag: &str) -> Result<Option<String>, ParseError> {
    let Some(element) = find_unique(scope, tag)? else {
        return Ok(None);
    };

    Ok(element
        .children()
        .find(|child| child.is_text())
        .and_then(|child| child.text())
        .map(str::to_string))
}

/// Flattens `<tag><a>1</a><b>2</b></tag>` into `{a: 1, b: 2}`; deeper
/// nesting is flattened the same way. An element without any content
/// counts as absent.
fn nested_tag_contents(scope: Node, tag: &str) -> Result<Option<ChannelData>, ParseError> {
    let Some(element) = find_unique(scope, tag)? else {
        return Ok(None);
    };
    trace!("Looking for contents of <{}>", tag);

    let mut contents = ChannelData::new();
    for child in element.children() {
        if child.is_text() {
            contents.insert(tag.to_string(), child.text().unwrap_or_default().to_string());
        } else if child.is_element() {
            if let Some(inner) = nested_tag_contents(element, child.tag_name().name())? {
                contents.extend(inner);
            }
        }
    }

    Ok((!contents.is_empty()).then_some(contents))
}

#[cfg(test)]
mod tests {
    use super::*;

    const USAGE_REPORT: &str = "<msg><src>CC128-v0.11</src><dsb>00089</dsb><time>13:02:39</time>\
        <tmprF>72.1</tmprF><sensor>1</sensor><id>00077</id><type>1</type>\
        <ch1><watts>00345</watts></ch1><ch2><watts>02151</watts></ch2><ch3><watts>00000</watts></ch3></msg>";

    #[test]
    fn test_parse_full_usage_report() {
        let reading = ReadingParser::new().parse(USAGE_REPORT).unwrap();

        assert_eq!(reading.device_version.as_deref(), Some("CC128-v0.11"));
        assert_eq!(reading.sensor_num, Some(1));
        assert_eq!(reading.radio_id.as_deref(), Some("00077"));
        assert_eq!(reading.poll_time.as_deref(), Some("13:02:39"));
        assert_eq!(reading.temperature.as_deref(), Some("72.1"));
        assert_eq!(reading.channels.len(), 3);
        assert_eq!(reading.channels.sensor_num(), 1);
        assert_eq!(reading.channels.watts(2), Some("02151"));
        assert_eq!(reading.number_channels(), 3);
        assert_eq!(reading.raw_message, USAGE_REPORT);
    }

    #[test]
    fn test_duplicate_single_tag_is_rejected() {
        let err = ReadingParser::new().parse("<msg><src>1</src><src>2</src></msg>").unwrap_err();
        assert_eq!(err, ParseError::DuplicateTag("src".to_string()));
    }

    #[test]
    fn test_duplicate_channel_is_rejected() {
        let err = ReadingParser::new()
            .parse("<msg><src>1</src><ch1><watts>1</watts></ch1><ch1><watts>2</watts></ch1></msg>")
            .unwrap_err();
        assert_eq!(err, ParseError::DuplicateTag("ch1".to_string()));
    }

    #[test]
    fn test_duplicate_tag_inside_channel_is_rejected() {
        let err = ReadingParser::new()
            .parse("<msg><ch1><watts>1</watts><watts>2</watts></ch1></msg>")
            .unwrap_err();
        assert_eq!(err, ParseError::DuplicateTag("watts".to_string()));
    }

    #[test]
    fn test_malformed_document() {
        let err = ReadingParser::new().parse("<msg><src>1</msg>").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn test_missing_fields_are_absent_not_errors() {
        let reading = ReadingParser::new().parse("<msg><src>CC128</src></msg>").unwrap();
        assert_eq!(reading.device_version.as_deref(), Some("CC128"));
        assert_eq!(reading.sensor_num, None);
        assert_eq!(reading.radio_id, None);
        assert_eq!(reading.temperature, None);
        assert!(reading.channels.is_empty());
        assert_eq!(reading.channels.sensor_num(), 0);
    }

    #[test]
    fn test_channel_gap_keeps_later_channels_but_count_stops() {
        let reading = ReadingParser::new()
            .parse("<msg><ch1><watts>1</watts></ch1><ch2><watts>2</watts></ch2><ch4><watts>4</watts></ch4></msg>")
            .unwrap();

        assert!(reading.channels.get(3).is_none());
        assert!(reading.channels.get(4).is_some());
        assert_eq!(reading.channels.contiguous_watts(), vec![(1, "1"), (2, "2")]);
        assert_eq!(reading.number_channels(), 2);
    }

    #[test]
    fn test_empty_channel_counts_as_absent() {
        let reading = ReadingParser::new().parse("<msg><ch1></ch1><ch2><watts>2</watts></ch2></msg>").unwrap();
        assert!(reading.channels.get(1).is_none());
        assert_eq!(reading.number_channels(), 0);
    }

    #[test]
    fn test_non_numeric_sensor() {
        let err = ReadingParser::new().parse("<msg><sensor>x1</sensor></msg>").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidNumber { tag: "sensor".to_string(), value: "x1".to_string() }
        );
    }

    #[test]
    fn test_celsius_temperature_fallback() {
        let reading = ReadingParser::new().parse("<msg><tmpr>21.4</tmpr></msg>").unwrap();
        assert_eq!(reading.temperature.as_deref(), Some("21.4"));
    }
}
