// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Data Streams
//!
//! Every upload belongs to exactly one data stream, identified by the folder
//! it was uploaded into. [`DataStream::spec`] is the single table describing
//! each stream: its chunk name, upload folder, structural fixup, canonical
//! headers and whether it is chunked at all.
//!
//! | Stream | Upload folder | Chunked | Fixup |
//! |--------|---------------|---------|-------|
//! | accelerometer | `accel` | yes | |
//! | bluetooth | `bluetoothLog` | yes | |
//! | calls | `callLog` | yes | Android: timestamp column first |
//! | devicemotion | `devicemotion` | yes | |
//! | gps | `gps` | yes | |
//! | gyro | `gyro` | yes | |
//! | identifiers | `identifiers` | yes | file timestamp inserted |
//! | android_log | `logFile` | yes | Android: event log reshaped to CSV |
//! | ios_log | `ios_log` | yes | |
//! | magnetometer | `magnetometer` | yes | |
//! | power_state | `powerState` | yes | |
//! | proximity | `proximity` | yes | |
//! | reachability | `reachability` | yes | |
//! | survey_answers | `surveyAnswers` | no | |
//! | survey_timings | `surveyTimings` | yes | `survey id` column inserted |
//! | texts | `textsLog` | yes | |
//! | audio_recordings | `voiceRecording` | no | |
//! | wifi | `wifiLog` | yes | Android: file timestamp prepended |
//! | image_survey | `imageSurvey` | no | |

use serde::{Deserialize, Serialize};

use crate::models::OsType;
use crate::storage::paths::normalize_upload_path;

/// Structural repair applied to a stream's decrypted CSV before binning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixup {
    None,
    AndroidLog,
    CallLog,
    Wifi,
    Identifiers,
    SurveyTimings,
}

/// Static description of one data stream.
#[derive(Debug)]
pub struct StreamSpec {
    pub name: &'static str,
    pub upload_folder: &'static str,
    pub chunkable: bool,
    pub fixup: Fixup,
    pub android_header: Option<&'static str>,
    pub ios_header: Option<&'static str>,
}

/// A category of device-collected data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStream {
    Accelerometer,
    Bluetooth,
    Calls,
    #[serde(rename = "devicemotion")]
    DeviceMotion,
    Gps,
    Gyro,
    Identifiers,
    AndroidLog,
    IosLog,
    Magnetometer,
    PowerState,
    Proximity,
    Reachability,
    SurveyAnswers,
    SurveyTimings,
    Texts,
    AudioRecordings,
    Wifi,
    ImageSurvey,
}

const EVENT_HEADER: &str = "timestamp,UTC time,event";
const MOTION_HEADER: &str = "timestamp,UTC time,accuracy,x,y,z";
const DEVICEMOTION_HEADER: &str = "timestamp,UTC time,roll,pitch,yaw,rotation_rate_x,rotation_rate_y,rotation_rate_z,gravity_x,gravity_y,gravity_z,user_accel_x,user_accel_y,user_accel_z,magnetic_field_calibration_accuracy,magnetic_field_x,magnetic_field_y,magnetic_field_z";
const IDENTIFIERS_HEADER: &str = "timestamp,UTC time,patient_id,MAC,phone_number,device_id,device_os,os_version,product,brand,hardware_id,manufacturer,model,beiwe_version";
const SURVEY_TIMINGS_ANDROID: &str = "timestamp,UTC time,question id,survey id,question type,question text,question answer options,answer";
const SURVEY_TIMINGS_IOS: &str = "timestamp,UTC time,question id,survey id,question type,question text,question answer options,answer,event";

const fn chunked(
    name: &'static str,
    upload_folder: &'static str,
    fixup: Fixup,
    android: &'static str,
    ios: &'static str,
) -> StreamSpec {
    StreamSpec {
        name,
        upload_folder,
        chunkable: true,
        fixup,
        android_header: Some(android),
        ios_header: Some(ios),
    }
}

const fn unchunked(name: &'static str, upload_folder: &'static str) -> StreamSpec {
    StreamSpec {
        name,
        upload_folder,
        chunkable: false,
        fixup: Fixup::None,
        android_header: None,
        ios_header: None,
    }
}

static ACCELEROMETER: StreamSpec = chunked("accelerometer", "accel", Fixup::None, MOTION_HEADER, MOTION_HEADER);
static BLUETOOTH: StreamSpec = chunked(
    "bluetooth",
    "bluetoothLog",
    Fixup::None,
    "timestamp,UTC time,hashed MAC,RSSI",
    "timestamp,UTC time,hashed MAC,RSSI",
);
static CALLS: StreamSpec = chunked(
    "calls",
    "callLog",
    Fixup::CallLog,
    "timestamp,UTC time,hashed phone number,call type,duration in seconds",
    "timestamp,UTC time,hashed phone number,call type,duration in seconds",
);
static DEVICEMOTION: StreamSpec = chunked(
    "devicemotion",
    "devicemotion",
    Fixup::None,
    DEVICEMOTION_HEADER,
    DEVICEMOTION_HEADER,
);
static GPS: StreamSpec = chunked(
    "gps",
    "gps",
    Fixup::None,
    "timestamp,UTC time,latitude,longitude,altitude,accuracy",
    "timestamp,UTC time,latitude,longitude,altitude,accuracy",
);
static GYRO: StreamSpec = chunked("gyro", "gyro", Fixup::None, MOTION_HEADER, "timestamp,UTC time,x,y,z");
static IDENTIFIERS: StreamSpec = chunked(
    "identifiers",
    "identifiers",
    Fixup::Identifiers,
    IDENTIFIERS_HEADER,
    IDENTIFIERS_HEADER,
);
static ANDROID_LOG: StreamSpec = chunked("android_log", "logFile", Fixup::AndroidLog, EVENT_HEADER, EVENT_HEADER);
static IOS_LOG: StreamSpec = chunked(
    "ios_log",
    "ios_log",
    Fixup::None,
    "timestamp,UTC time,launchId,memory,battery,event,msg,d1,d2,d3,d4",
    "timestamp,UTC time,launchId,memory,battery,event,msg,d1,d2,d3,d4",
);
static MAGNETOMETER: StreamSpec = chunked(
    "magnetometer",
    "magnetometer",
    Fixup::None,
    "timestamp,UTC time,x,y,z",
    "timestamp,UTC time,x,y,z",
);
static POWER_STATE: StreamSpec = chunked(
    "power_state",
    "powerState",
    Fixup::None,
    EVENT_HEADER,
    "timestamp,UTC time,event,level",
);
static PROXIMITY: StreamSpec = chunked("proximity", "proximity", Fixup::None, EVENT_HEADER, EVENT_HEADER);
static REACHABILITY: StreamSpec = chunked("reachability", "reachability", Fixup::None, EVENT_HEADER, EVENT_HEADER);
static SURVEY_ANSWERS: StreamSpec = unchunked("survey_answers", "surveyAnswers");
static SURVEY_TIMINGS: StreamSpec = chunked(
    "survey_timings",
    "surveyTimings",
    Fixup::SurveyTimings,
    SURVEY_TIMINGS_ANDROID,
    SURVEY_TIMINGS_IOS,
);
static TEXTS: StreamSpec = chunked(
    "texts",
    "textsLog",
    Fixup::None,
    "timestamp,UTC time,hashed phone number,sent vs received,message length,time sent",
    "timestamp,UTC time,hashed phone number,sent vs received,message length,time sent",
);
static AUDIO_RECORDINGS: StreamSpec = unchunked("audio_recordings", "voiceRecording");
static WIFI: StreamSpec = chunked(
    "wifi",
    "wifiLog",
    Fixup::Wifi,
    "timestamp,UTC time,hashed MAC,frequency,RSSI",
    "timestamp,UTC time,hashed MAC,frequency,RSSI",
);
static IMAGE_SURVEY: StreamSpec = unchunked("image_survey", "imageSurvey");

impl DataStream {
    pub const ALL: [DataStream; 19] = [
        Self::Accelerometer,
        Self::Bluetooth,
        Self::Calls,
        Self::DeviceMotion,
        Self::Gps,
        Self::Gyro,
        Self::Identifiers,
        Self::AndroidLog,
        Self::IosLog,
        Self::Magnetometer,
        Self::PowerState,
        Self::Proximity,
        Self::Reachability,
        Self::SurveyAnswers,
        Self::SurveyTimings,
        Self::Texts,
        Self::AudioRecordings,
        Self::Wifi,
        Self::ImageSurvey,
    ];

    pub fn spec(self) -> &'static StreamSpec {
        match self {
            Self::Accelerometer => &ACCELEROMETER,
            Self::Bluetooth => &BLUETOOTH,
            Self::Calls => &CALLS,
            Self::DeviceMotion => &DEVICEMOTION,
            Self::Gps => &GPS,
            Self::Gyro => &GYRO,
            Self::Identifiers => &IDENTIFIERS,
            Self::AndroidLog => &ANDROID_LOG,
            Self::IosLog => &IOS_LOG,
            Self::Magnetometer => &MAGNETOMETER,
            Self::PowerState => &POWER_STATE,
            Self::Proximity => &PROXIMITY,
            Self::Reachability => &REACHABILITY,
            Self::SurveyAnswers => &SURVEY_ANSWERS,
            Self::SurveyTimings => &SURVEY_TIMINGS,
            Self::Texts => &TEXTS,
            Self::AudioRecordings => &AUDIO_RECORDINGS,
            Self::Wifi => &WIFI,
            Self::ImageSurvey => &IMAGE_SURVEY,
        }
    }

    /// Name used in chunk paths and the registry.
    pub fn as_str(self) -> &'static str {
        self.spec().name
    }

    pub fn is_chunkable(self) -> bool {
        self.spec().chunkable
    }

    /// Streams whose uploads carry a survey id in their path.
    pub fn is_survey(self) -> bool {
        matches!(
            self,
            Self::SurveyAnswers | Self::SurveyTimings | Self::ImageSurvey
        )
    }

    /// Canonical chunk header for this stream on the given OS.
    pub fn reference_header(self, os: OsType) -> Option<&'static str> {
        let spec = self.spec();
        match os {
            OsType::Android => spec.android_header,
            OsType::Ios => spec.ios_header,
        }
    }

    /// Classify an upload by the folders in its path.
    ///
    /// Identifier uploads are named `identifiers_<timestamp>.csv` with no
    /// folder of their own, and old iOS logs live under `ios/log`; both are
    /// matched on the raw path when no folder matches.
    pub fn from_upload_path(path: &str) -> Option<Self> {
        let path = normalize_upload_path(path);
        for piece in path.split('/') {
            if let Some(stream) = Self::from_upload_folder(piece) {
                return Some(stream);
            }
        }
        if path.contains("identifiers") {
            return Some(Self::Identifiers);
        }
        if path.contains("ios/log") {
            return Some(Self::IosLog);
        }
        None
    }

    fn from_upload_folder(folder: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|stream| stream.spec().upload_folder == folder)
    }
}

impl std::fmt::Display for DataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_folder() {
        assert_eq!(DataStream::from_upload_path("s1/p1/gps/1700000000000.csv"), Some(DataStream::Gps));
        assert_eq!(DataStream::from_upload_path("s1/p1/accel/1.csv"), Some(DataStream::Accelerometer));
        assert_eq!(
            DataStream::from_upload_path("s1/p1/surveyTimings/abc123/1.csv"),
            Some(DataStream::SurveyTimings)
        );
        assert_eq!(
            DataStream::from_upload_path("s1/p1/voiceRecording/1.mp4"),
            Some(DataStream::AudioRecordings)
        );
    }

    #[test]
    fn classify_legacy_names() {
        assert_eq!(
            DataStream::from_upload_path("s1/p1/identifiers_1700000000000.csv"),
            Some(DataStream::Identifiers)
        );
        assert_eq!(DataStream::from_upload_path("s1/p1/ios/log/1.csv"), Some(DataStream::IosLog));
        assert_eq!(DataStream::from_upload_path("s1/p1/unknown/1.csv"), None);
    }

    #[test]
    fn classify_ignores_duplicate_suffix() {
        assert_eq!(
            DataStream::from_upload_path("s1/p1/wifiLog/1.csv-duplicate-xyz.zstd"),
            Some(DataStream::Wifi)
        );
    }

    #[test]
    fn headers_are_keyed_by_os() {
        assert_eq!(
            DataStream::Gyro.reference_header(OsType::Android),
            Some("timestamp,UTC time,accuracy,x,y,z")
        );
        assert_eq!(DataStream::Gyro.reference_header(OsType::Ios), Some("timestamp,UTC time,x,y,z"));
        assert_eq!(
            DataStream::PowerState.reference_header(OsType::Ios),
            Some("timestamp,UTC time,event,level")
        );
        assert_eq!(DataStream::SurveyAnswers.reference_header(OsType::Android), None);
    }

    #[test]
    fn every_chunkable_stream_has_headers() {
        for stream in DataStream::ALL {
            let spec = stream.spec();
            assert_eq!(spec.chunkable, spec.android_header.is_some(), "{stream}");
            assert_eq!(spec.chunkable, spec.ios_header.is_some(), "{stream}");
        }
    }

    #[test]
    fn serde_names_match_chunk_names() {
        for stream in DataStream::ALL {
            let json = serde_json::to_string(&stream).unwrap();
            assert_eq!(json, format!("\"{}\"", stream.as_str()));
        }
    }
}
