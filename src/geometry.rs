//! Converter geometry: lengths, bounding boxes, and paper sizes.
//!
//! These types serialise to the compact strings users write in configuration
//! (`"2pt"`, `"A4-landscape"`, `"10mm,10mm,5cm,3cm"`) and render to the
//! `--bbox=` syntax of `dvisvgm`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// TeX length units understood by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    /// TeX point (1/72.27 in).
    Pt,
    /// Millimeter.
    Mm,
    /// Centimeter.
    Cm,
    /// Inch.
    In,
    /// Big point (1/72 in).
    Bp,
    /// Pica (12 pt).
    Pc,
    /// Didot point.
    Dd,
    /// Cicero (12 dd).
    Cc,
    /// Scaled point (1/65536 pt).
    Sp,
}

impl LengthUnit {
    pub const ALL: [LengthUnit; 9] = [
        LengthUnit::Pt,
        LengthUnit::Mm,
        LengthUnit::Cm,
        LengthUnit::In,
        LengthUnit::Bp,
        LengthUnit::Pc,
        LengthUnit::Dd,
        LengthUnit::Cc,
        LengthUnit::Sp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LengthUnit::Pt => "pt",
            LengthUnit::Mm => "mm",
            LengthUnit::Cm => "cm",
            LengthUnit::In => "in",
            LengthUnit::Bp => "bp",
            LengthUnit::Pc => "pc",
            LengthUnit::Dd => "dd",
            LengthUnit::Cc => "cc",
            LengthUnit::Sp => "sp",
        }
    }
}

/// A length with an explicit unit, e.g. `2.5mm`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    pub fn new(value: f64, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    pub fn pt(value: f64) -> Self {
        Self::new(value, LengthUnit::Pt)
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.as_str())
    }
}

impl FromStr for Length {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unit = LengthUnit::ALL
            .into_iter()
            .find(|u| s.ends_with(u.as_str()))
            .ok_or_else(|| format!("length '{s}' is missing a unit (pt, mm, cm, in, bp, pc, dd, cc, sp)"))?;
        let number = s[..s.len() - unit.as_str().len()].trim();
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number '{number}' in length '{s}'"))?;
        if !value.is_finite() {
            return Err(format!("length '{s}' is not finite"));
        }
        Ok(Length { value, unit })
    }
}

impl TryFrom<String> for Length {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Length> for String {
    fn from(l: Length) -> Self {
        l.to_string()
    }
}

/// Bounding box of the produced SVG.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BoundingBox {
    /// Tight box around the ink, enlarged on every side by this amount.
    Padding(Length),
    /// Explicit lower-left and upper-right corners.
    Corners {
        x1: Length,
        y1: Length,
        x2: Length,
        y2: Length,
    },
}

impl BoundingBox {
    /// Argument for `dvisvgm --bbox=`.
    pub fn to_converter_arg(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundingBox::Padding(l) => write!(f, "{l}"),
            BoundingBox::Corners { x1, y1, x2, y2 } => write!(f, "{x1},{y1},{x2},{y2}"),
        }
    }
}

impl FromStr for BoundingBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([',', ' ']).filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [pad] => Ok(BoundingBox::Padding(pad.parse()?)),
            [x1, y1, x2, y2] => Ok(BoundingBox::Corners {
                x1: x1.parse()?,
                y1: y1.parse()?,
                x2: x2.parse()?,
                y2: y2.parse()?,
            }),
            _ => Err(format!(
                "bounding box '{s}' must be one length or four comma-separated lengths"
            )),
        }
    }
}

impl TryFrom<String> for BoundingBox {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BoundingBox> for String {
    fn from(b: BoundingBox) -> Self {
        b.to_string()
    }
}

/// Page orientation for a paper size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// ISO 216/269 and DIN 476 series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsoSeries {
    A,
    B,
    C,
    D,
}

/// Named North-American paper formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NorthAmerican {
    Letter,
    Legal,
    Executive,
    Invoice,
    Ledger,
}

impl NorthAmerican {
    fn as_str(self) -> &'static str {
        match self {
            NorthAmerican::Letter => "letter",
            NorthAmerican::Legal => "legal",
            NorthAmerican::Executive => "executive",
            NorthAmerican::Invoice => "invoice",
            NorthAmerican::Ledger => "ledger",
        }
    }
}

/// A paper format: a DIN/ISO designation, a North-American name, or an
/// explicit size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaperFormat {
    /// `A0`..`A10`, `B0`..`B10`, `C0`..`C10`, `D0`..`D10`.
    Iso(IsoSeries, u8),
    NorthAmerican(NorthAmerican),
    Custom { width: Length, height: Length },
}

/// Paper size plus orientation, e.g. `A4-landscape` or `12cm x 8cm`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperSize {
    pub format: PaperFormat,
    pub orientation: Orientation,
}

impl PaperSize {
    pub fn new(format: PaperFormat) -> Self {
        Self {
            format,
            orientation: Orientation::Portrait,
        }
    }

    pub fn landscape(mut self) -> Self {
        self.orientation = Orientation::Landscape;
        self
    }

    /// Argument for `dvisvgm --bbox=`.
    ///
    /// Named formats map to dvisvgm paper names; explicit sizes become a
    /// `0,0,w,h` box (swapped for landscape).
    pub fn to_converter_arg(&self) -> String {
        match self.format {
            PaperFormat::Iso(series, n) => {
                let name = format!("{}{}", iso_letter(series), n);
                with_orientation(name, self.orientation)
            }
            PaperFormat::NorthAmerican(na) => {
                with_orientation(na.as_str().to_string(), self.orientation)
            }
            PaperFormat::Custom { width, height } => {
                let (w, h) = match self.orientation {
                    Orientation::Portrait => (width, height),
                    Orientation::Landscape => (height, width),
                };
                format!("0{u},0{u},{w},{h}", u = w.unit.as_str())
            }
        }
    }
}

fn iso_letter(series: IsoSeries) -> char {
    match series {
        IsoSeries::A => 'A',
        IsoSeries::B => 'B',
        IsoSeries::C => 'C',
        IsoSeries::D => 'D',
    }
}

fn with_orientation(name: String, orientation: Orientation) -> String {
    match orientation {
        Orientation::Portrait => name,
        Orientation::Landscape => format!("{name}-landscape"),
    }
}

impl fmt::Display for PaperSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.format {
            PaperFormat::Iso(series, n) => format!("{}{}", iso_letter(series), n),
            PaperFormat::NorthAmerican(na) => na.as_str().to_string(),
            PaperFormat::Custom { width, height } => format!("{width}x{height}"),
        };
        f.write_str(&with_orientation(base, self.orientation))
    }
}

impl FromStr for PaperSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        let (body, orientation) = if let Some(b) = lower.strip_suffix("-landscape") {
            (b, Orientation::Landscape)
        } else if let Some(b) = lower.strip_suffix("-portrait") {
            (b, Orientation::Portrait)
        } else {
            (lower.as_str(), Orientation::Portrait)
        };

        let format = match body {
            "letter" => PaperFormat::NorthAmerican(NorthAmerican::Letter),
            "legal" => PaperFormat::NorthAmerican(NorthAmerican::Legal),
            "executive" => PaperFormat::NorthAmerican(NorthAmerican::Executive),
            "invoice" => PaperFormat::NorthAmerican(NorthAmerican::Invoice),
            "ledger" => PaperFormat::NorthAmerican(NorthAmerican::Ledger),
            other if other.contains('x') => {
                let (w, h) = other
                    .split_once('x')
                    .ok_or_else(|| format!("invalid paper size '{trimmed}'"))?;
                PaperFormat::Custom {
                    width: w.parse()?,
                    height: h.parse()?,
                }
            }
            other => parse_iso(other).ok_or_else(|| {
                format!(
                    "unknown paper size '{trimmed}' (expected A0–D10, letter, legal, executive, \
                     invoice, ledger, or <w>x<h>)"
                )
            })?,
        };

        Ok(PaperSize {
            format,
            orientation,
        })
    }
}

fn parse_iso(s: &str) -> Option<PaperFormat> {
    let mut chars = s.chars();
    let series = match chars.next()? {
        'a' => IsoSeries::A,
        'b' => IsoSeries::B,
        'c' => IsoSeries::C,
        'd' => IsoSeries::D,
        _ => return None,
    };
    let n: u8 = chars.as_str().parse().ok()?;
    (n <= 10).then_some(PaperFormat::Iso(series, n))
}

impl TryFrom<String> for PaperSize {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PaperSize> for String {
    fn from(p: PaperSize) -> Self {
        p.to_string()
    }
}

/// Options forwarded to the DVI/PDF → SVG converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConverterOptions {
    /// Explicit bounding box. Mutually exclusive with `paper_size`.
    pub bbox: Option<BoundingBox>,
    /// Paper-sized bounding box. Mutually exclusive with `bbox`.
    pub paper_size: Option<PaperSize>,
    /// Compute the box from glyph outlines rather than font metrics.
    pub exact_bbox: bool,
    /// Draw glyphs as paths instead of embedding fonts. Default: true.
    pub no_fonts: bool,
    /// Significant digits in coordinates (1–6); `None` lets the converter pick.
    pub precision: Option<u8>,
    /// Scale factor applied to the output.
    pub zoom: Option<f64>,
    /// Page of the intermediate document to convert. Default: 1.
    pub page: u32,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            bbox: None,
            paper_size: None,
            exact_bbox: false,
            no_fonts: true,
            precision: None,
            zoom: None,
            page: 1,
        }
    }
}

impl ConverterOptions {
    /// `--bbox=` value, if any geometry was requested.
    pub fn bbox_arg(&self) -> Option<String> {
        self.bbox
            .map(|b| b.to_converter_arg())
            .or_else(|| self.paper_size.map(|p| p.to_converter_arg()))
    }

    /// Structural checks the converter cannot express itself.
    pub fn validate(&self) -> Result<(), String> {
        if self.bbox.is_some() && self.paper_size.is_some() {
            return Err("converter.bbox and converter.paper_size are mutually exclusive".into());
        }
        if let Some(p) = self.precision {
            if !(1..=6).contains(&p) {
                return Err(format!("converter.precision must be 1–6, got {p}"));
            }
        }
        if let Some(z) = self.zoom {
            if !z.is_finite() || z <= 0.0 {
                return Err(format!("converter.zoom must be positive, got {z}"));
            }
        }
        if self.page == 0 {
            return Err("converter.page is 1-indexed".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lengths_with_every_unit() {
        for unit in LengthUnit::ALL {
            let l: Length = format!("1.5{}", unit.as_str()).parse().unwrap();
            assert_eq!(l.unit, unit);
            assert_eq!(l.value, 1.5);
        }
        // "pc" must not be mistaken for "cc" and vice versa
        assert_eq!("3pc".parse::<Length>().unwrap().unit, LengthUnit::Pc);
        assert_eq!("3cc".parse::<Length>().unwrap().unit, LengthUnit::Cc);
    }

    #[test]
    fn length_without_unit_is_rejected() {
        assert!("12".parse::<Length>().is_err());
        assert!("abcpt".parse::<Length>().is_err());
    }

    #[test]
    fn bbox_padding_and_corners() {
        assert_eq!(
            "2pt".parse::<BoundingBox>().unwrap(),
            BoundingBox::Padding(Length::pt(2.0))
        );
        let b: BoundingBox = "0mm,0mm,5cm,3cm".parse().unwrap();
        assert_eq!(b.to_converter_arg(), "0mm,0mm,5cm,3cm");
        assert!("1pt,2pt".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn paper_sizes() {
        let a4: PaperSize = "A4".parse().unwrap();
        assert_eq!(a4.format, PaperFormat::Iso(IsoSeries::A, 4));
        assert_eq!(a4.to_converter_arg(), "A4");

        let d10: PaperSize = "d10-landscape".parse().unwrap();
        assert_eq!(d10.to_converter_arg(), "D10-landscape");

        assert!("A11".parse::<PaperSize>().is_err());
        assert!("E4".parse::<PaperSize>().is_err());

        let letter: PaperSize = "Letter".parse().unwrap();
        assert_eq!(letter.to_converter_arg(), "letter");

        let custom: PaperSize = "12cmx8cm-landscape".parse().unwrap();
        assert_eq!(custom.to_converter_arg(), "0cm,0cm,8cm,12cm");
    }

    #[test]
    fn geometry_serialises_as_strings() {
        let opts = ConverterOptions {
            bbox: Some(BoundingBox::Padding(Length::new(1.0, LengthUnit::Mm))),
            ..Default::default()
        };
        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json["bbox"], "1mm");
        let back: ConverterOptions = serde_json::from_value(json).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn bbox_and_paper_are_exclusive() {
        let opts = ConverterOptions {
            bbox: Some(BoundingBox::Padding(Length::pt(1.0))),
            paper_size: Some("A4".parse().unwrap()),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn bbox_arg_prefers_bbox_then_paper() {
        let mut opts = ConverterOptions::default();
        assert_eq!(opts.bbox_arg(), None);
        opts.paper_size = Some("legal-landscape".parse().unwrap());
        assert_eq!(opts.bbox_arg().as_deref(), Some("legal-landscape"));
    }
}
