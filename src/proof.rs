// Proof-of-delivery capture: OTP cells, photo, signature and note

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::delivery::Requirements;
use crate::gateway::ProofType;

pub const OTP_LENGTH: usize = 6;

static OTP_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{6}$").expect("OTP pattern is a valid regex")
});

/// True when `code` is exactly six ASCII digits
pub fn is_valid_otp_code(code: &str) -> bool {
    OTP_CODE.is_match(code)
}

/// Opaque reference to the image chosen in the platform picker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoRef(pub String);

impl PhotoRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The requirement a proof gate found unmet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissingProof {
    Photo,
    Signature,
    FailureReason,
}

impl fmt::Display for MissingProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingProof::Photo => f.write_str("a delivery photo is required"),
            MissingProof::Signature => f.write_str("the receiver's signature is required"),
            MissingProof::FailureReason => f.write_str("select a failure reason"),
        }
    }
}

/// Six single-digit cells with input focus, as typed by the courier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpBuffer {
    cells: [Option<char>; OTP_LENGTH],
    focus: usize,
    error: Option<String>,
}

impl OtpBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer pre-filled from a full code; the code must already be valid
    pub fn from_code(code: &str) -> Self {
        let mut buffer = Self::new();
        for (cell, digit) in buffer.cells.iter_mut().zip(code.chars()) {
            *cell = Some(digit);
        }
        buffer.focus = OTP_LENGTH - 1;
        buffer
    }

    /// Put `value` into cell `index`. Values longer than one character or
    /// containing a non-numeral are ignored. An empty value clears the cell.
    /// Returns whether the input was accepted.
    pub fn enter_digit(&mut self, index: usize, value: &str) -> bool {
        if index >= OTP_LENGTH {
            return false;
        }
        let mut chars = value.chars();
        let digit = match (chars.next(), chars.next()) {
            (None, _) => None,
            (Some(c), None) if c.is_ascii_digit() => Some(c),
            _ => return false,
        };

        self.cells[index] = digit;
        self.clear_error();
        self.focus = if digit.is_some() && index < OTP_LENGTH - 1 {
            index + 1
        } else {
            index
        };
        true
    }

    /// Delete key in cell `index`: clears a filled cell, or moves focus
    /// back when the cell is already empty.
    pub fn backspace(&mut self, index: usize) {
        if index >= OTP_LENGTH {
            return;
        }
        if self.cells[index].take().is_some() {
            self.focus = index;
        } else if index > 0 {
            self.focus = index - 1;
        }
    }

    pub fn code(&self) -> String {
        self.cells.iter().flatten().collect()
    }

    pub fn cell(&self, index: usize) -> Option<char> {
        self.cells.get(index).copied().flatten()
    }

    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(|c| matches!(c, Some(d) if d.is_ascii_digit()))
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofCapture {
    pub otp: OtpBuffer,
    pub photo: Option<PhotoRef>,
    signature: String,
    note: String,
}

impl ProofCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_signature(&mut self, text: impl Into<String>) {
        self.signature = text.into();
    }

    pub fn set_note(&mut self, text: impl Into<String>) {
        self.note = text.into();
    }

    /// Trimmed receiver name; empty when nothing was typed
    pub fn signature(&self) -> &str {
        self.signature.trim()
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn has_photo(&self) -> bool {
        self.photo.is_some()
    }

    pub fn has_signature(&self) -> bool {
        !self.signature().is_empty()
    }

    /// Signature as sent to the server (absent when blank)
    pub fn signature_for_submission(&self) -> Option<String> {
        Some(self.signature()).filter(|s| !s.is_empty()).map(str::to_string)
    }

    /// Note as sent to the server (absent when blank)
    pub fn note_for_submission(&self) -> Option<String> {
        Some(self.note.trim()).filter(|n| !n.is_empty()).map(str::to_string)
    }

    /// First unmet evidence requirement, photo before signature
    pub fn missing_for(&self, requirements: &Requirements) -> Option<MissingProof> {
        if requirements.requires_photo && !self.has_photo() {
            return Some(MissingProof::Photo);
        }
        if requirements.requires_signature && !self.has_signature() {
            return Some(MissingProof::Signature);
        }
        None
    }

    /// PHOTO if a photo is present, else SIGNATURE if signed, else OTP
    pub fn proof_type(&self) -> ProofType {
        if self.has_photo() {
            ProofType::Photo
        } else if self.has_signature() {
            ProofType::Signature
        } else {
            ProofType::Otp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_code_format() {
        assert!(is_valid_otp_code("123456"));
        assert!(!is_valid_otp_code("12345"));
        assert!(!is_valid_otp_code("1234567"));
        assert!(!is_valid_otp_code("12a45"));
        assert!(!is_valid_otp_code("12 456"));
        // Non-ASCII digits are not accepted
        assert!(!is_valid_otp_code("١٢٣٤٥٦"));
    }

    #[test]
    fn test_entering_digits_moves_focus_forward() {
        let mut otp = OtpBuffer::new();
        for (i, d) in ["1", "2", "3", "4", "5", "6"].iter().enumerate() {
            assert!(otp.enter_digit(i, d));
        }
        assert_eq!(otp.code(), "123456");
        assert!(otp.is_complete());
        // Last cell keeps focus
        assert_eq!(otp.focus(), 5);
    }

    #[test]
    fn test_rejects_multi_char_and_non_numeric_input() {
        let mut otp = OtpBuffer::new();
        assert!(!otp.enter_digit(0, "12"));
        assert!(!otp.enter_digit(0, "a"));
        assert!(!otp.enter_digit(6, "1"));
        assert_eq!(otp.code(), "");
        assert_eq!(otp.focus(), 0);
    }

    #[test]
    fn test_entering_digit_clears_error() {
        let mut otp = OtpBuffer::new();
        otp.set_error("Invalid OTP code");
        otp.enter_digit(0, "4");
        assert_eq!(otp.error(), None);
    }

    #[test]
    fn test_backspace_on_empty_cell_moves_focus_back() {
        let mut otp = OtpBuffer::new();
        otp.enter_digit(0, "1");
        otp.enter_digit(1, "2");
        assert_eq!(otp.focus(), 2);

        otp.backspace(2);
        assert_eq!(otp.focus(), 1);

        otp.backspace(1);
        assert_eq!(otp.cell(1), None);
        assert_eq!(otp.focus(), 1);

        otp.backspace(0);
        otp.backspace(0);
        assert_eq!(otp.focus(), 0);
        assert_eq!(otp.code(), "");
    }

    #[test]
    fn test_proof_type_precedence() {
        let mut proof = ProofCapture::new();
        assert_eq!(proof.proof_type(), ProofType::Otp);

        proof.set_signature("  Jane Doe ");
        assert_eq!(proof.proof_type(), ProofType::Signature);
        assert_eq!(proof.signature(), "Jane Doe");

        proof.photo = Some(PhotoRef::new("file://photo.jpg"));
        assert_eq!(proof.proof_type(), ProofType::Photo);
    }

    #[test]
    fn test_missing_requirements_reported_photo_first() {
        let requirements = Requirements::none().with_photo().with_signature();
        let mut proof = ProofCapture::new();
        assert_eq!(proof.missing_for(&requirements), Some(MissingProof::Photo));

        proof.photo = Some(PhotoRef::new("content://1"));
        assert_eq!(proof.missing_for(&requirements), Some(MissingProof::Signature));

        proof.set_signature("   ");
        assert_eq!(proof.missing_for(&requirements), Some(MissingProof::Signature));

        proof.set_signature("J. Doe");
        assert_eq!(proof.missing_for(&requirements), None);
    }

    #[test]
    fn test_blank_note_is_not_submitted() {
        let mut proof = ProofCapture::new();
        proof.set_note("   ");
        assert_eq!(proof.note_for_submission(), None);
        proof.set_note(" left at gate ");
        assert_eq!(proof.note_for_submission().as_deref(), Some("left at gate"));
    }
}
