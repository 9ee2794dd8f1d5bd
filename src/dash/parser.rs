use log::warn;
use roxmltree::{Document, Node};
use thiserror::Error;

use super::fetcher::Fetch;
use crate::error::StreamError;
use crate::utils::{base_url, resolve_url};

/* Frame-list MPD
<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" mediaPresentationDuration="PT0M10S">
    <AdaptationSet mimeType="application/ply">
        <Representation id="0" frameRate="30">
            <FrameList>
                <FrameURL media="frames/frame_0000.ply"/>
                <FrameURL media="frames/frame_0001.ply"/>
                <!-- one FrameURL per frame -->
            </FrameList>
        </Representation>
    </AdaptationSet>
</MPD>
*/

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to fetch MPD")]
    Fetch(#[from] StreamError),
    #[error("MPD is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("Failed to parse MPD XML")]
    Xml(#[from] roxmltree::Error),
    #[error("MPD has no Representation")]
    MissingRepresentation,
    #[error("Invalid frameRate {0:?}")]
    InvalidFrameRate(String),
    #[error("Invalid mediaPresentationDuration {0:?}")]
    InvalidDuration(String),
    #[error("MPD declares no frames")]
    NoFrames,
}

/// What the session needs from a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPlan {
    pub frame_rate: u32,
    pub total_frames: usize,
    /// Exactly `total_frames` urls in playback order.
    pub frame_urls: Vec<String>,
}

impl ManifestPlan {
    /// Fetches and parses the MPD at `source`.
    pub fn load(source: &str, fetcher: &dyn Fetch) -> Result<Self, ManifestError> {
        let bytes = fetcher.fetch(source)?;
        let xml = String::from_utf8(bytes)?;
        Self::parse(&xml, source)
    }

    /// Parses an MPD. Relative frame urls resolve against `BaseURL`, else the manifest's directory.
    pub fn parse(xml: &str, manifest_url: &str) -> Result<Self, ManifestError> {
        let parser = FrameListParser::new(xml)?;
        let representation = parser
            .get_representation()
            .ok_or(ManifestError::MissingRepresentation)?;

        let frame_rate = parse_frame_rate(representation)?;
        let declared = parser
            .get_duration_secs()?
            .map(|secs| (secs * frame_rate as f64).round() as usize);

        let base = match parser.get_base_url() {
            Some(base_url_text) => resolve_url(&base_url(manifest_url), base_url_text),
            None => base_url(manifest_url),
        };
        let mut frame_urls: Vec<String> = parser
            .get_frame_urls(representation)
            .into_iter()
            .map(|media| resolve_url(&base, media))
            .collect();

        let total_frames = match declared {
            Some(declared) => {
                if declared != frame_urls.len() {
                    warn!(
                        "[session] MPD declared {declared} frames, but found {} FrameURLs",
                        frame_urls.len()
                    );
                }
                declared.min(frame_urls.len())
            }
            None => frame_urls.len(),
        };
        frame_urls.truncate(total_frames);

        if total_frames == 0 {
            return Err(ManifestError::NoFrames);
        }
        Ok(ManifestPlan {
            frame_rate,
            total_frames,
            frame_urls,
        })
    }
}

struct FrameListParser<'a> {
    doc: Document<'a>,
}

impl<'a> FrameListParser<'a> {
    fn new(xml: &'a str) -> Result<Self, ManifestError> {
        Ok(FrameListParser {
            doc: Document::parse(xml)?,
        })
    }

    fn get_base_url(&self) -> Option<&str> {
        self.doc
            .descendants()
            .find(|n| n.has_tag_name("BaseURL"))
            .and_then(|n| n.text())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn get_duration_secs(&self) -> Result<Option<f64>, ManifestError> {
        match self.doc.root_element().attribute("mediaPresentationDuration") {
            Some(d) => parse_iso_duration(d)
                .map(Some)
                .ok_or_else(|| ManifestError::InvalidDuration(d.to_string())),
            None => Ok(None),
        }
    }

    /// The first Representation of the first AdaptationSet that has one.
    fn get_representation(&self) -> Option<Node<'_, 'a>> {
        self.doc
            .descendants()
            .filter(|n| n.has_tag_name("AdaptationSet"))
            .find_map(|set| set.children().find(|n| n.has_tag_name("Representation")))
    }

    fn get_frame_urls<'n>(&self, representation: Node<'n, 'a>) -> Vec<&'n str> {
        representation
            .children()
            .filter(|n| n.has_tag_name("FrameList"))
            .flat_map(|list| list.children().filter(|n| n.has_tag_name("FrameURL")))
            .filter_map(|n| n.attribute("media"))
            .collect()
    }
}

fn parse_frame_rate(representation: Node) -> Result<u32, ManifestError> {
    let raw = representation.attribute("frameRate").unwrap_or_default();
    let invalid = || ManifestError::InvalidFrameRate(raw.to_string());
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| invalid())?;
            let den: f64 = den.trim().parse().map_err(|_| invalid())?;
            if den <= 0.0 {
                return Err(invalid());
            }
            (num / den).round()
        }
        None => raw.trim().parse::<f64>().map_err(|_| invalid())?.round(),
    };
    if !(1.0..=u32::MAX as f64).contains(&rate) {
        return Err(invalid());
    }
    Ok(rate as u32)
}

/// Seconds in an ISO-8601 duration of the form `P[nD]T[nH][nM][nS]`.
fn parse_iso_duration(s: &str) -> Option<f64> {
    let rest = s.trim().strip_prefix('P')?;
    let (days, time) = match rest.split_once('T') {
        Some((days, time)) => (days, time),
        None => (rest, ""),
    };

    let mut secs = 0.0;
    if !days.is_empty() {
        secs += days.strip_suffix('D')?.parse::<f64>().ok()? * 86_400.0;
    }
    let mut number = String::new();
    for c in time.chars() {
        let unit = match c {
            'H' => 3600.0,
            'M' => 60.0,
            'S' => 1.0,
            c if c.is_ascii_digit() || c == '.' => {
                number.push(c);
                continue;
            }
            _ => return None,
        };
        secs += number.parse::<f64>().ok()? * unit;
        number.clear();
    }
    if !number.is_empty() || (days.is_empty() && time.is_empty()) {
        return None;
    }
    Some(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mpd(duration: &str, frame_rate: &str, frames: usize, base: Option<&str>) -> String {
        let base = base
            .map(|b| format!("<BaseURL>{b}</BaseURL>"))
            .unwrap_or_default();
        let urls: String = (0..frames)
            .map(|i| format!("<FrameURL media=\"frame_{i:04}.ply\"/>"))
            .collect();
        format!(
            r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" {duration}>
    {base}
    <AdaptationSet mimeType="application/ply">
        <Representation id="0" frameRate="{frame_rate}">
            <FrameList>{urls}</FrameList>
        </Representation>
    </AdaptationSet>
</MPD>"#
        )
    }

    #[test]
    fn parse_frame_list() {
        let xml = mpd(r#"mediaPresentationDuration="PT0M1S""#, "5", 5, None);
        let plan = ManifestPlan::parse(&xml, "http://localhost:8080/loot/stream.mpd").unwrap();
        assert_eq!(plan.frame_rate, 5);
        assert_eq!(plan.total_frames, 5);
        assert_eq!(plan.frame_urls[0], "http://localhost:8080/loot/frame_0000.ply");
        assert_eq!(plan.frame_urls[4], "http://localhost:8080/loot/frame_0004.ply");
    }

    #[test]
    fn count_mismatch_uses_the_smaller() {
        let xml = mpd(r#"mediaPresentationDuration="PT2S""#, "3", 4, None);
        let plan = ManifestPlan::parse(&xml, "stream.mpd").unwrap();
        assert_eq!(plan.total_frames, 4);
        assert_eq!(plan.frame_urls[0], "./frame_0000.ply");

        let xml = mpd(r#"mediaPresentationDuration="PT1S""#, "3", 10, None);
        let plan = ManifestPlan::parse(&xml, "stream.mpd").unwrap();
        assert_eq!(plan.total_frames, 3);
        assert_eq!(plan.frame_urls.len(), 3);
    }

    #[test]
    fn missing_duration_counts_urls() {
        let xml = mpd("", "30000/1001", 7, Some("https://cdn.example.com/seq/"));
        let plan = ManifestPlan::parse(&xml, "https://www.example.com/stream.mpd").unwrap();
        assert_eq!(plan.frame_rate, 30);
        assert_eq!(plan.total_frames, 7);
        assert_eq!(plan.frame_urls[6], "https://cdn.example.com/seq/frame_0006.ply");
    }

    #[test]
    fn relative_base_url() {
        let xml = mpd("", "10", 1, Some("frames/"));
        let plan = ManifestPlan::parse(&xml, "data/stream.mpd").unwrap();
        assert_eq!(plan.frame_urls, ["data/frames/frame_0000.ply"]);
    }

    #[test]
    fn invalid_manifests() {
        let xml = mpd("", "0", 3, None);
        assert!(matches!(
            ManifestPlan::parse(&xml, "a.mpd"),
            Err(ManifestError::InvalidFrameRate(_))
        ));
        let xml = mpd(r#"mediaPresentationDuration="10 seconds""#, "30", 3, None);
        assert!(matches!(
            ManifestPlan::parse(&xml, "a.mpd"),
            Err(ManifestError::InvalidDuration(_))
        ));
        let xml = mpd("", "30", 0, None);
        assert!(matches!(ManifestPlan::parse(&xml, "a.mpd"), Err(ManifestError::NoFrames)));
        assert!(matches!(
            ManifestPlan::parse("<MPD/>", "a.mpd"),
            Err(ManifestError::MissingRepresentation)
        ));
        assert!(matches!(ManifestPlan::parse("<MPD>", "a.mpd"), Err(ManifestError::Xml(_))));
    }

    #[test]
    fn iso_durations() {
        assert_eq!(parse_iso_duration("PT10S"), Some(10.0));
        assert_eq!(parse_iso_duration("PT1M30S"), Some(90.0));
        assert_eq!(parse_iso_duration("PT1H0M0.5S"), Some(3600.5));
        assert_eq!(parse_iso_duration("P1DT1S"), Some(86_401.0));
        assert_eq!(parse_iso_duration("PT"), None);
        assert_eq!(parse_iso_duration("PT5"), None);
        assert_eq!(parse_iso_duration("10S"), None);
    }
}
