//! Burst shared (e.g. protocol) code
//!
//! This crate contains code shared between the burst server and its clients.  It consists of the
//! [serde](https://crates.io/crates/serde)-enabled structs which define the client/server protocol, plus the
//! persisted per-photo record and the timestamp format used throughout.

#![deny(warnings)]

use {
    anyhow::{anyhow, Error},
    chrono::NaiveDateTime,
    serde_derive::{Deserialize, Serialize},
    std::{
        collections::BTreeMap,
        fmt::{self, Display},
    },
};

/// The `strftime`-style format of every capture timestamp stored or reported by the server, e.g.
/// "2021:07:04 12:30:00"
///
/// This is the same layout EXIF uses for its `DateTime*` fields.
pub const DATE_TAKEN_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Parse a capture timestamp formatted according to [DATE_TAKEN_FORMAT].
///
/// Returns `None` if the string does not match the format exactly.
pub fn parse_date_taken(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATE_TAKEN_FORMAT).ok()
}

/// Format a timestamp according to [DATE_TAKEN_FORMAT].
pub fn format_date_taken(datetime: &NaiveDateTime) -> String {
    datetime.format(DATE_TAKEN_FORMAT).to_string()
}

/// User-assigned preference label for a photo: 0, 1, or 2
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "i64", into = "i64")]
pub struct Ranking(u8);

impl Ranking {
    /// The highest valid ranking
    pub const MAX: u8 = 2;

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Ranking {
    /// Newly uploaded photos are ranked 1.
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<i64> for Ranking {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .filter(|&value| value <= Self::MAX)
            .map(Self)
            .ok_or_else(|| anyhow!("ranking must be 0, 1, or 2 (got {value})"))
    }
}

impl From<Ranking> for i64 {
    fn from(ranking: Ranking) -> Self {
        i64::from(ranking.0)
    }
}

impl Display for Ranking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata persisted for each uploaded photo, keyed by its path relative to the upload directory
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct PhotoRecord {
    /// Capture timestamp extracted from the photo's embedded metadata, formatted according to
    /// [DATE_TAKEN_FORMAT]
    ///
    /// This is `None` if no timestamp could be found.  Strings which fail to parse are kept as-is but ignored
    /// when grouping.
    pub date_taken: Option<String>,

    /// User-assigned ranking
    #[serde(default)]
    pub ranking: Ranking,
}

/// Represents the response to a POST /upload request
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct UploadResponse {
    /// Final stored filenames, in the order the files were received
    ///
    /// HEIF/HEIC uploads are reported under their normalized ".jpeg" name.  Files which could not be stored are
    /// omitted.
    pub uploaded: Vec<String>,
}

/// Represents the response to a GET /list_uploads request
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct UploadsResponse {
    /// Paths of all stored photo files, relative to the upload directory
    pub files: Vec<String>,
}

/// A single member of a burst as reported by GET /grouped_photos
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct GroupedPhoto {
    pub filename: String,

    /// Capture timestamp formatted according to [DATE_TAKEN_FORMAT]
    pub date_taken: String,
}

/// Represents the response to a GET /grouped_photos request
#[derive(Serialize, Deserialize, Debug, Default, Eq, PartialEq)]
pub struct GroupedPhotosResponse {
    /// Bursts in ascending time order; the position of a burst in this list is its group index
    pub groups: Vec<Vec<GroupedPhoto>>,
}

/// Represents the query string of a DELETE /delete_upload request
#[derive(Serialize, Deserialize, Debug)]
pub struct DeleteQuery {
    pub filename: Option<String>,
}

/// Represents the response to a DELETE /delete_upload request
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct DeleteResponse {
    pub deleted: String,
}

/// Represents the body of a POST /update_ranking request
///
/// Both fields are optional here so that the server can report a missing field with its own error rather than a
/// generic deserialization failure.
#[derive(Serialize, Deserialize, Debug)]
pub struct RankingUpdate {
    pub filename: Option<String>,
    pub ranking: Option<i64>,
}

/// Represents the response to a successful POST /update_ranking request
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct RankingResponse {
    pub filename: String,
    pub ranking: Ranking,
}

/// Represents the body of a POST /set_group_name request, which is echoed back on success
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct GroupName {
    /// Position of the burst in the GET /grouped_photos response
    ///
    /// Names are keyed by position, not by burst contents, so a name follows its index (not its photos) when
    /// deleting photos renumbers the bursts.
    pub group_idx: i64,
    pub name: String,
}

/// Represents the response to a GET /group_names request: group index to name
///
/// Indexes are serialized as JSON object keys, i.e. strings.
pub type GroupNames = BTreeMap<i64, String>;
