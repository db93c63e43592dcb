use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiteType {
    #[serde(rename = "SITE_TYPE_UNSPECIFIED")]
    Unspecified,
    #[default]
    #[serde(rename = "SITE_TYPE_DATA_CENTER")]
    DataCenter,
    #[serde(rename = "SITE_TYPE_BRANCH")]
    Branch,
    #[serde(rename = "SITE_TYPE_CONNECTIVITY_NODE")]
    ConnectivityNode,
    #[serde(rename = "SITE_TYPE_CLOUD")]
    Cloud,
    #[serde(rename = "SITE_TYPE_REMOTE_WORKER")]
    RemoteWorker,
}

impl FromStr for SiteType {
    type Err = String;

    /// Accepts both `SITE_TYPE_BRANCH` and the short `branch` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        let short = normalized.strip_prefix("SITE_TYPE_").unwrap_or(&normalized);
        match short {
            "UNSPECIFIED" => Ok(SiteType::Unspecified),
            "DATA_CENTER" | "DATACENTER" => Ok(SiteType::DataCenter),
            "BRANCH" => Ok(SiteType::Branch),
            "CONNECTIVITY_NODE" => Ok(SiteType::ConnectivityNode),
            "CLOUD" => Ok(SiteType::Cloud),
            "REMOTE_WORKER" => Ok(SiteType::RemoteWorker),
            _ => Err(format!("unknown site type '{s}'")),
        }
    }
}

/// Postal address of a site. Every part is independently optional.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostalAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl PostalAddress {
    pub fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.city.is_none()
            && self.region.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }
}

/// A physical or logical location that agents are affiliated with.
/// The service keys sites by `title`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_address: Option<PostalAddress>,
    #[serde(rename = "type", default)]
    pub site_type: SiteType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_type_accepts_short_and_wire_forms() {
        assert_eq!("branch".parse::<SiteType>().unwrap(), SiteType::Branch);
        assert_eq!(
            "SITE_TYPE_DATA_CENTER".parse::<SiteType>().unwrap(),
            SiteType::DataCenter
        );
        assert_eq!("remote-worker".parse::<SiteType>().unwrap(), SiteType::RemoteWorker);
        assert!("moon-base".parse::<SiteType>().is_err());
    }

    #[test]
    fn test_site_omits_missing_geo_fields() {
        let site = Site {
            id: None,
            title: "London Office".to_string(),
            lat: Some(51.5),
            lon: None,
            postal_address: None,
            site_type: SiteType::Branch,
        };
        let json = serde_json::to_value(&site).unwrap();
        assert_eq!(json["type"], "SITE_TYPE_BRANCH");
        assert_eq!(json["lat"], 51.5);
        assert!(json.get("lon").is_none());
        assert!(json.get("postalAddress").is_none());
    }
}
