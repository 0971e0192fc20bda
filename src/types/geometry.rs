//! CRS-aware geometry wrapper and WKB/WKT codec glue
//!
//! The geometry model itself is `geo_types`; this module adds the one thing it lacks
//! for a feature store: every geometry, and every part of a multi-geometry, carries
//! the CRS of the store it came from.

use crate::types::{Crs, Envelope};
use crate::{Result, StoreError};
use geo::BoundingRect;
use geo_types::{
    Geometry as GeoGeometry, GeometryCollection, MultiLineString, MultiPoint, MultiPolygon,
};
use geozero::wkb::Wkb;
use geozero::{CoordDimensions, ToGeo, ToWkb};
use wkt::TryFromWkt;

/// Aggregate flavour of a multi-part geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiKind {
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    Collection,
}

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Primitive(GeoGeometry<f64>),
    Multi { kind: MultiKind, parts: Vec<Geometry> },
}

/// Geometry value with an attached CRS
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    crs: Option<Crs>,
    shape: Shape,
}

impl Geometry {
    /// Wraps a `geo_types` geometry, splitting multi-geometries into parts
    pub fn from_geo(geometry: GeoGeometry<f64>) -> Self {
        let shape = match geometry {
            GeoGeometry::MultiPoint(mp) => Shape::Multi {
                kind: MultiKind::MultiPoint,
                parts: mp.0.into_iter().map(|p| Self::primitive(p.into())).collect(),
            },
            GeoGeometry::MultiLineString(ml) => Shape::Multi {
                kind: MultiKind::MultiLineString,
                parts: ml.0.into_iter().map(|l| Self::primitive(l.into())).collect(),
            },
            GeoGeometry::MultiPolygon(mp) => Shape::Multi {
                kind: MultiKind::MultiPolygon,
                parts: mp.0.into_iter().map(|p| Self::primitive(p.into())).collect(),
            },
            GeoGeometry::GeometryCollection(gc) => Shape::Multi {
                kind: MultiKind::Collection,
                parts: gc.0.into_iter().map(Self::from_geo).collect(),
            },
            other => Shape::Primitive(other),
        };
        Self { crs: None, shape }
    }

    fn primitive(geometry: GeoGeometry<f64>) -> Self {
        Self { crs: None, shape: Shape::Primitive(geometry) }
    }

    /// Attaches `crs` to this geometry and, recursively, to every part
    pub fn with_crs(mut self, crs: &Crs) -> Self {
        self.set_crs(crs);
        self
    }

    pub fn set_crs(&mut self, crs: &Crs) {
        self.crs = Some(crs.clone());
        if let Shape::Multi { parts, .. } = &mut self.shape {
            for part in parts {
                part.set_crs(crs);
            }
        }
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    /// Parts of a multi-geometry; empty for primitives
    pub fn parts(&self) -> &[Geometry] {
        match &self.shape {
            Shape::Primitive(_) => &[],
            Shape::Multi { parts, .. } => parts,
        }
    }

    pub fn multi_kind(&self) -> Option<MultiKind> {
        match &self.shape {
            Shape::Primitive(_) => None,
            Shape::Multi { kind, .. } => Some(*kind),
        }
    }

    /// Reassembles the plain `geo_types` geometry
    pub fn to_geo(&self) -> GeoGeometry<f64> {
        match &self.shape {
            Shape::Primitive(g) => g.clone(),
            Shape::Multi { kind, parts } => {
                let members: Vec<GeoGeometry<f64>> = parts.iter().map(Geometry::to_geo).collect();
                match kind {
                    MultiKind::MultiPoint => collect_multi(members, |g| match g {
                        GeoGeometry::Point(p) => Some(p),
                        _ => None,
                    })
                    .map(|v| GeoGeometry::MultiPoint(MultiPoint(v))),
                    MultiKind::MultiLineString => collect_multi(members, |g| match g {
                        GeoGeometry::LineString(l) => Some(l),
                        _ => None,
                    })
                    .map(|v| GeoGeometry::MultiLineString(MultiLineString(v))),
                    MultiKind::MultiPolygon => collect_multi(members, |g| match g {
                        GeoGeometry::Polygon(p) => Some(p),
                        _ => None,
                    })
                    .map(|v| GeoGeometry::MultiPolygon(MultiPolygon(v))),
                    MultiKind::Collection => Err(members),
                }
                .unwrap_or_else(|members| GeoGeometry::GeometryCollection(GeometryCollection(members)))
            }
        }
    }

    /// Bounding envelope in this geometry's CRS; `None` for empty geometries
    pub fn envelope(&self) -> Option<Envelope> {
        let rect = self.to_geo().bounding_rect()?;
        let env = Envelope::from_rect(rect);
        Some(match &self.crs {
            Some(crs) => env.with_crs(crs.clone()),
            None => env,
        })
    }
}

/// Unwraps homogeneous members; hands the members back when one does not fit
fn collect_multi<T>(
    members: Vec<GeoGeometry<f64>>,
    pick: impl Fn(GeoGeometry<f64>) -> Option<T>,
) -> std::result::Result<Vec<T>, Vec<GeoGeometry<f64>>> {
    if members.iter().all(|m| pick(m.clone()).is_some()) {
        Ok(members.into_iter().filter_map(pick).collect())
    } else {
        Err(members)
    }
}

/// Decodes a WKB blob
pub fn decode_wkb(bytes: &[u8]) -> Result<Geometry> {
    let geometry = Wkb(bytes.to_vec())
        .to_geo()
        .map_err(|e| StoreError::Codec(format!("invalid WKB: {}", e)))?;
    Ok(Geometry::from_geo(geometry))
}

/// Encodes as 2D WKB
pub fn encode_wkb(geometry: &Geometry) -> Result<Vec<u8>> {
    geometry
        .to_geo()
        .to_wkb(CoordDimensions::xy())
        .map_err(|e| StoreError::Codec(format!("WKB encoding failed: {}", e)))
}

/// Parses WKT text, as returned by bbox statements
pub fn parse_wkt(text: &str) -> Result<Geometry> {
    let geometry = GeoGeometry::<f64>::try_from_wkt_str(text.trim())
        .map_err(|e| StoreError::Codec(format!("invalid WKT '{}': {}", text, e)))?;
    Ok(Geometry::from_geo(geometry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, point, polygon};

    fn utm() -> Crs {
        Crs::new("EPSG:25832")
    }

    fn assert_crs_everywhere(geometry: &Geometry, crs: &Crs) {
        assert_eq!(geometry.crs(), Some(crs));
        for part in geometry.parts() {
            assert_crs_everywhere(part, crs);
        }
    }

    #[test]
    fn test_wkb_roundtrip_multipolygon() {
        let original: GeoGeometry<f64> = MultiPolygon(vec![
            polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 0.0)],
            polygon![(x: 10.5, y: 10.25), (x: 12.0, y: 10.0), (x: 11.0, y: 13.125), (x: 10.5, y: 10.25)],
        ])
        .into();

        let bytes = encode_wkb(&Geometry::from_geo(original.clone())).unwrap();
        let decoded = decode_wkb(&bytes).unwrap().with_crs(&utm());

        assert_eq!(decoded.to_geo(), original);
        assert_eq!(decoded.multi_kind(), Some(MultiKind::MultiPolygon));
        assert_eq!(decoded.parts().len(), 2);
        assert_crs_everywhere(&decoded, &utm());
    }

    #[test]
    fn test_wkb_roundtrip_nested_collection() {
        let inner: GeoGeometry<f64> =
            MultiPoint(vec![point!(x: 1.0, y: 2.0), point!(x: 3.0, y: 4.0)]).into();
        let original = GeoGeometry::GeometryCollection(GeometryCollection(vec![
            inner,
            line_string![(x: 0.0, y: 0.0), (x: 5.0, y: 5.0)].into(),
        ]));

        let bytes = encode_wkb(&Geometry::from_geo(original.clone())).unwrap();
        let decoded = decode_wkb(&bytes).unwrap().with_crs(&utm());

        assert_eq!(decoded.to_geo(), original);
        assert_eq!(decoded.parts()[0].parts().len(), 2);
        assert_crs_everywhere(&decoded, &utm());
    }

    #[test]
    fn test_decode_garbage_is_codec_error() {
        assert!(matches!(decode_wkb(&[0x01, 0x02]), Err(StoreError::Codec(_))));
    }

    #[test]
    fn test_parse_wkt_envelope() {
        let geom = parse_wkt("POLYGON((1 2, 7 2, 7 9, 1 9, 1 2))").unwrap();
        let env = geom.envelope().unwrap();
        assert_eq!((env.min_x, env.min_y, env.max_x, env.max_y), (1.0, 2.0, 7.0, 9.0));
        assert!(parse_wkt("POLYGON((1 2").is_err());
    }
}
