use serde::{Deserialize, Serialize};

/// Which evidence a delivery must collect before it can be completed.
/// Supplied per parcel by the dispatch side; this crate never decides it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Requirements {
    pub requires_otp: bool,
    pub requires_signature: bool,
    pub requires_photo: bool,
}

impl Requirements {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_otp(mut self) -> Self {
        self.requires_otp = true;
        self
    }

    pub fn with_signature(mut self) -> Self {
        self.requires_signature = true;
        self
    }

    pub fn with_photo(mut self) -> Self {
        self.requires_photo = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDetails {
    pub weight: Option<f64>,
    pub dimensions: Option<String>,
    pub description: Option<String>,
}

/// The parcel being delivered, as handed over by the parcel list.
/// Read-only to the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: String,
    pub tracking_number: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub delivery_option: Option<String>,
    pub customer_name: String,
    pub customer_phone: String,
    pub address: String,
    #[serde(default)]
    pub delivery_instructions: Option<String>,
    #[serde(default)]
    pub package_details: Option<PackageDetails>,
    #[serde(default)]
    pub requirements: Requirements,
}

impl DeliveryRecord {
    pub fn new(
        id: impl Into<String>,
        tracking_number: impl Into<String>,
        customer_name: impl Into<String>,
        customer_phone: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tracking_number: tracking_number.into(),
            status: None,
            delivery_option: None,
            customer_name: customer_name.into(),
            customer_phone: customer_phone.into(),
            address: address.into(),
            delivery_instructions: None,
            package_details: None,
            requirements: Requirements::default(),
        }
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_default_to_nothing_required() {
        let requirements: Requirements = serde_json::from_str("{}").unwrap();
        assert_eq!(requirements, Requirements::none());
    }

    #[test]
    fn test_delivery_record_parses_camel_case() {
        let json = r#"{
            "id": "p-1",
            "trackingNumber": "SCP-0001",
            "customerName": "Jane Doe",
            "customerPhone": "+237600000000",
            "address": "Rue 1, Yaounde",
            "requirements": { "requiresOtp": true, "requiresPhoto": true }
        }"#;

        let record: DeliveryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.tracking_number, "SCP-0001");
        assert!(record.requirements.requires_otp);
        assert!(record.requirements.requires_photo);
        assert!(!record.requirements.requires_signature);
        assert!(record.package_details.is_none());
    }
}
