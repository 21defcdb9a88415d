//! ICC profiles for the enumerated JP2 colour spaces, built with Little CMS.

use std::sync::OnceLock;

use lcms2::{
    CIExyY, CIExyYTRIPLE, ColorSpaceSignature, GlobalContext, InfoType, Locale, Profile, ToneCurve,
};
use log::debug;

use crate::codec::ColorSpace;
use crate::error::Result;

const D65: CIExyY = CIExyY {
    x: 0.3127,
    y: 0.3290,
    Y: 1.0,
};

/// IEC 61966-2-1 transfer curve as a type-4 parametric curve.
const SRGB_CURVE: [f64; 5] = [2.4, 1.0 / 1.055, 0.055 / 1.055, 1.0 / 12.92, 0.04045];

/// Total area coverage for the CMYK ink-limiting profile, in percent.
const CMYK_INK_LIMIT: f64 = 300.0;

/// Builds an ICC profile describing `color_space`.
///
/// Spaces without an ICC equivalent, and the `Icc*` spaces (which carry their own
/// profile), give `None`.
pub fn create_profile(color_space: ColorSpace) -> Option<Vec<u8>> {
    let profile = match color_space {
        ColorSpace::Srgb | ColorSpace::Sycc => return Some(srgb_bytes().to_vec()),
        ColorSpace::SLum => gray_profile(),
        ColorSpace::Romm => romm_profile(),
        ColorSpace::CieLab => {
            Profile::<GlobalContext>::new_lab4_context(GlobalContext::new(), CIExyY::d50())
                .map_err(Into::into)
        }
        ColorSpace::Cmyk => Profile::ink_limiting(ColorSpaceSignature::CmykData, CMYK_INK_LIMIT)
            .map_err(Into::into),
        _ => return None,
    };
    match profile.and_then(|p| Ok(p.icc()?)) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!("no ICC profile for {color_space:?}: {e}");
            None
        }
    }
}

fn gray_profile() -> Result<Profile> {
    let curve = ToneCurve::new_parametric(4, &SRGB_CURVE)?;
    Ok(Profile::new_gray(&D65, &curve)?)
}

fn romm_profile() -> Result<Profile> {
    let primaries = CIExyYTRIPLE {
        Red: CIExyY {
            x: 0.7347,
            y: 0.2653,
            Y: 1.0,
        },
        Green: CIExyY {
            x: 0.1596,
            y: 0.8404,
            Y: 1.0,
        },
        Blue: CIExyY {
            x: 0.0366,
            y: 0.0001,
            Y: 1.0,
        },
    };
    let curve = ToneCurve::new(1.8);
    Ok(Profile::new_rgb(
        CIExyY::d50(),
        &primaries,
        &[&curve, &curve, &curve],
    )?)
}

fn srgb_bytes() -> &'static [u8] {
    static SRGB: OnceLock<Vec<u8>> = OnceLock::new();
    SRGB.get_or_init(|| Profile::new_srgb().icc().unwrap_or_default())
}

/// Whether `data` describes sRGB: either the profile [`create_profile`] returns
/// for [`ColorSpace::Srgb`], or an RGB profile whose description names sRGB.
pub fn is_srgb_profile(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    if data == srgb_bytes() {
        return true;
    }
    match Profile::new_icc(data) {
        Ok(p) => {
            p.color_space() == ColorSpaceSignature::RgbData
                && p.info(InfoType::Description, Locale::none())
                    .is_some_and(|d| d.contains("sRGB"))
        }
        Err(_) => false,
    }
}

/// Colour space implied by an embedded profile's header.
pub(crate) fn classify_profile(data: &[u8]) -> ColorSpace {
    if is_srgb_profile(data) {
        return ColorSpace::Srgb;
    }
    match data.get(16..20) {
        Some(b"GRAY") => ColorSpace::IccLum,
        Some(b"RGB ") => ColorSpace::IccRgb,
        _ => ColorSpace::IccAny,
    }
}
