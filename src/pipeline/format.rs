//! Human-readable result blocks written into scan records.
//!
//! The mobile clients render these strings verbatim. An empty result always
//! formats to an empty string with no header.

use crate::models::recognition::{DetectedFace, ImageClass, Recognition};

pub const TEXT_HEADER: &str = "**Text Scan Result**\n\n";
pub const CLASSIFICATION_HEADER: &str = "**Classification Result**\n\n";
pub const FACE_DETECTION_HEADER: &str = "**Face Detection Result**\n\n";

pub fn render(recognition: &Recognition) -> String {
    match recognition {
        Recognition::Text(text) => text_result(text),
        Recognition::Classes(classes) => classification_result(classes),
        Recognition::Faces(faces) => face_detection_result(faces),
    }
}

pub fn text_result(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    format!("{TEXT_HEADER}{text}")
}

pub fn classification_result(classes: &[ImageClass]) -> String {
    if classes.is_empty() {
        return String::new();
    }

    let mut out = String::from(CLASSIFICATION_HEADER);
    for class in classes {
        out.push_str(&format!("Class: {}\n", class.label));
        out.push_str(&format!("Score: {}\n", class.score));
        if let Some(hierarchy) = &class.type_hierarchy {
            out.push_str(&format!("Type: {hierarchy}\n"));
        }
        out.push('\n');
    }
    out
}

pub fn face_detection_result(faces: &[DetectedFace]) -> String {
    if faces.is_empty() {
        return String::new();
    }

    let mut out = String::from(FACE_DETECTION_HEADER);
    out.push_str(&format!("Number of faces detected: {}\n", faces.len()));
    for face in faces {
        out.push_str(&format!(
            "Gender: {}, Age: {} - {}\n",
            face.gender,
            age_bound(face.age_min),
            age_bound(face.age_max)
        ));
    }
    out
}

// Open-ended ranges (e.g. "65 and up") come back without one bound.
fn age_bound(bound: Option<u32>) -> String {
    bound.map_or_else(|| "?".to_string(), |age| age.to_string())
}
