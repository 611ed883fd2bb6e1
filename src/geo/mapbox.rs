//! Mapbox forward-geocoding client.

use super::{GeoFeature, GeocodeProvider, Location};
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use url::Url;

const MAPBOX_PLACES_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places/";

#[derive(Debug, Deserialize)]
struct PlacesResponse {
    #[serde(default)]
    features: Vec<PlaceFeature>,
}

#[derive(Debug, Deserialize)]
struct PlaceFeature {
    #[serde(default)]
    text: String,
    /// `[longitude, latitude]`
    #[serde(default)]
    center: Vec<f64>,
}

/// Geocoder backed by the Mapbox places API.
///
/// Uses a blocking client; call it from a blocking context.
pub struct MapboxGeocoder {
    client: Client,
    token: String,
}

impl MapboxGeocoder {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::new(),
            token,
        }
    }

    fn url_for(&self, place: &str) -> Result<Url> {
        let mut url = Url::parse(MAPBOX_PLACES_URL).map_err(|e| Error::Geocode(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| Error::Geocode("mapbox url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&format!("{}.json", place));
        url.query_pairs_mut()
            .append_pair("access_token", &self.token)
            .append_pair("types", "region,place,postcode")
            .append_pair("autocomplete", "false");
        Ok(url)
    }
}

impl GeocodeProvider for MapboxGeocoder {
    fn lookup(&self, place: &str) -> Result<Vec<GeoFeature>> {
        let url = self.url_for(place)?;
        let resp = self.client.get(url).send()?;
        let status = resp.status();
        let body = resp.text()?;

        if !status.is_success() {
            tracing::error!("Mapbox API error: {} - {}", status, body);
            return Err(Error::Geocode(format!("mapbox returned {}", status)));
        }

        let parsed: PlacesResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Geocode(format!("failed to parse mapbox response: {}", e)))?;
        Ok(into_features(parsed))
    }
}

fn into_features(response: PlacesResponse) -> Vec<GeoFeature> {
    response
        .features
        .into_iter()
        .filter_map(|f| match f.center.as_slice() {
            [longitude, latitude] => Some(GeoFeature {
                label: f.text,
                location: Location {
                    latitude: *latitude,
                    longitude: *longitude,
                },
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encodes_place_and_params() {
        let geocoder = MapboxGeocoder::new("tok".to_string());
        let url = geocoder.url_for("new york").unwrap();
        assert_eq!(url.path(), "/geocoding/v5/mapbox.places/new%20york.json");
        let query = url.query().unwrap();
        assert!(query.contains("access_token=tok"));
        assert!(query.contains("autocomplete=false"));
    }

    #[test]
    fn test_parse_swaps_center_to_lat_lon() {
        let body = r#"{
            "type": "FeatureCollection",
            "features": [
                {"text": "Paris", "place_name": "Paris, France", "center": [2.35, 48.85]},
                {"text": "Broken", "center": [1.0]}
            ]
        }"#;
        let parsed: PlacesResponse = serde_json::from_str(body).unwrap();
        let features = into_features(parsed);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].label, "Paris");
        assert_eq!(features[0].location.latitude, 48.85);
        assert_eq!(features[0].location.longitude, 2.35);
    }
}
