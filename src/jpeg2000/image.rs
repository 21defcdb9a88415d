//! Coding parameters carried by the main and tile-part headers, and the
//! tile / resolution / band / precinct / code-block geometry derived from them
//! (ISO/IEC 15444-1 Annex B).

use crate::codec::Order;
use crate::error::{J2kError, Result};

/// Orientation of a wavelet subband.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubbandOrientation {
    #[default]
    /// Low-Low (base image)
    LL,
    /// High-Low (horizontal high-pass)
    HL,
    /// Low-High (vertical high-pass)
    LH,
    /// High-High (diagonal details)
    HH,
}

impl SubbandOrientation {
    /// `log2` of the nominal analysis gain (Table E.1).
    pub fn gain_log2(self) -> u8 {
        match self {
            Self::LL => 0,
            Self::HL | Self::LH => 1,
            Self::HH => 2,
        }
    }

    /// `(xob, yob)` of equation B-15.
    fn offsets(self) -> (u64, u64) {
        match self {
            Self::LL => (0, 0),
            Self::HL => (1, 0),
            Self::LH => (0, 1),
            Self::HH => (1, 1),
        }
    }

    /// Whether the horizontal and vertical filters are high-pass.
    pub fn high_pass(self) -> (bool, bool) {
        let (x, y) = self.offsets();
        (x == 1, y == 1)
    }
}

/// Metadata for a single component from the SIZ marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct J2kComponentInfo {
    /// Bit depth (1..=38).
    pub depth: u8,
    pub signed: bool,
    /// Horizontal subsampling factor
    pub dx: u8,
    /// Vertical subsampling factor
    pub dy: u8,
}

/// Image and tile size (SIZ).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct J2kSiz {
    /// Capabilities; 3 and 4 mark 2K and 4K digital cinema streams.
    pub rsiz: u16,
    /// Right edge of the image area on the reference grid.
    pub x1: u32,
    /// Bottom edge of the image area on the reference grid.
    pub y1: u32,
    /// Horizontal offset of the image area on the reference grid.
    pub x0: u32,
    /// Vertical offset of the image area on the reference grid.
    pub y0: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Horizontal offset of the first tile on the reference grid.
    pub tile_x0: u32,
    /// Vertical offset of the first tile on the reference grid.
    pub tile_y0: u32,
    pub components: Vec<J2kComponentInfo>,
}

impl J2kSiz {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn tiles_wide(&self) -> u32 {
        (self.x1 - self.tile_x0).div_ceil(self.tile_width)
    }

    pub fn tiles_high(&self) -> u32 {
        (self.y1 - self.tile_y0).div_ceil(self.tile_height)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_wide() as usize * self.tiles_high() as usize
    }

    /// `(tx0, ty0, tx1, ty1)` of tile `index` (equation B-7).
    pub fn tile_rect(&self, index: usize) -> (u32, u32, u32, u32) {
        let p = (index % self.tiles_wide() as usize) as u64;
        let q = (index / self.tiles_wide() as usize) as u64;
        let (tw, th) = (self.tile_width as u64, self.tile_height as u64);
        let tx0 = (self.tile_x0 as u64 + p * tw).max(self.x0 as u64);
        let ty0 = (self.tile_y0 as u64 + q * th).max(self.y0 as u64);
        let tx1 = (self.tile_x0 as u64 + (p + 1) * tw).min(self.x1 as u64);
        let ty1 = (self.tile_y0 as u64 + (q + 1) * th).min(self.y1 as u64);
        (tx0 as u32, ty0 as u32, tx1 as u32, ty1 as u32)
    }

    /// Component extent `(x0, y0, x1, y1)` in its own sample coordinates.
    pub fn component_rect(&self, c: usize) -> (u32, u32, u32, u32) {
        let info = &self.components[c];
        let (dx, dy) = (info.dx as u32, info.dy as u32);
        (
            self.x0.div_ceil(dx),
            self.y0.div_ceil(dy),
            self.x1.div_ceil(dx),
            self.y1.div_ceil(dy),
        )
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |reason| {
            Err(J2kError::InvalidMarkerSegment {
                marker: 0xFF51,
                reason,
            })
        };
        if self.components.is_empty() || self.components.len() > 16384 {
            return bad("component count out of range");
        }
        if self.x1 <= self.x0 || self.y1 <= self.y0 {
            return bad("empty image area");
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return bad("zero tile size");
        }
        if self.tile_x0 > self.x0
            || self.tile_y0 > self.y0
            || self.tile_x0 as u64 + self.tile_width as u64 <= self.x0 as u64
            || self.tile_y0 as u64 + self.tile_height as u64 <= self.y0 as u64
        {
            return bad("first tile does not cover the image origin");
        }
        if self.tile_count() > 65535 {
            return bad("too many tiles");
        }
        for c in &self.components {
            if c.dx == 0 || c.dy == 0 {
                return bad("zero component subsampling");
            }
            if c.depth == 0 || c.depth > 31 {
                return bad("component precision out of range");
            }
        }
        Ok(())
    }
}

/// Coding style of one component (SPcod / SPcoc).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct J2kCodingStyle {
    /// Number of decomposition levels.
    pub levels: u8,
    /// Code-block width exponent (6 means 64).
    pub cb_width_exp: u8,
    pub cb_height_exp: u8,
    /// Code-block style flags (`CBLK_*`).
    pub cb_style: u8,
    /// 5/3 reversible filter rather than 9/7.
    pub reversible: bool,
    /// `(PPx, PPy)` per resolution; empty means maximal precincts.
    pub precincts: Vec<(u8, u8)>,
}

impl Default for J2kCodingStyle {
    fn default() -> Self {
        Self {
            levels: 5,
            cb_width_exp: 6,
            cb_height_exp: 6,
            cb_style: 0,
            reversible: true,
            precincts: Vec::new(),
        }
    }
}

impl J2kCodingStyle {
    pub fn precinct(&self, resolution: usize) -> (u8, u8) {
        self.precincts.get(resolution).copied().unwrap_or((15, 15))
    }
}

pub const SCOD_PRECINCTS: u8 = 0x01;
pub const SCOD_SOP: u8 = 0x02;
pub const SCOD_EPH: u8 = 0x04;

/// Coding style default (COD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct J2kCod {
    pub scod: u8,
    pub order: Order,
    pub layers: u16,
    /// 1 when the first three components carry a colour transform.
    pub mct: u8,
    pub style: J2kCodingStyle,
}

impl Default for J2kCod {
    fn default() -> Self {
        Self {
            scod: 0,
            order: Order::Lrcp,
            layers: 1,
            mct: 0,
            style: J2kCodingStyle::default(),
        }
    }
}

pub const QUANT_NONE: u8 = 0;
pub const QUANT_DERIVED: u8 = 1;
pub const QUANT_EXPOUNDED: u8 = 2;

/// Quantization parameters (QCD / QCC).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct J2kQuantization {
    pub style: u8,
    pub guard_bits: u8,
    /// `(exponent, mantissa)` per band: LL, then HL, LH, HH per resolution.
    pub steps: Vec<(u8, u16)>,
}

impl J2kQuantization {
    /// Exponent and mantissa for a band of resolution `r`; `band` counts
    /// HL, LH, HH as 0, 1, 2 and is ignored at resolution 0.
    pub fn band_step(&self, r: usize, band: usize) -> Result<(u8, u16)> {
        if self.style == QUANT_DERIVED {
            let (eps0, mu0) = *self
                .steps
                .first()
                .ok_or_else(|| J2kError::invalid("derived quantization without a base step"))?;
            let eps = if r == 0 {
                eps0
            } else {
                (eps0 as usize + 1).saturating_sub(r) as u8
            };
            return Ok((eps, mu0));
        }
        let index = if r == 0 { 0 } else { 1 + 3 * (r - 1) + band };
        self.steps
            .get(index)
            .copied()
            .ok_or_else(|| J2kError::invalid("quantization parameters missing for a subband"))
    }
}

/// A code-block's position inside its tile.
#[derive(Debug, Clone)]
pub struct CodeBlockGeometry {
    pub component: usize,
    pub resolution: usize,
    /// Index in [`Resolution::bands`].
    pub band: usize,
    /// Extent in band coordinates.
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    /// Top-left sample in the tile-component coefficient array.
    pub array_x: u32,
    pub array_y: u32,
}

impl CodeBlockGeometry {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

/// Code-blocks of one band that fall inside one precinct.
#[derive(Debug, Clone, Default)]
pub struct PrecinctBand {
    pub cbs_wide: u32,
    pub cbs_high: u32,
    /// Indices into [`TileLayout::codeblocks`], raster order.
    pub codeblocks: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Band {
    pub orientation: SubbandOrientation,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    /// Top-left of the band in the deinterleaved coefficient array.
    pub offset_x: u32,
    pub offset_y: u32,
    /// Per precinct of the owning resolution.
    pub precincts: Vec<PrecinctBand>,
}

impl Band {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    /// Position in the HL/LH/HH triple, as used by quantization tables.
    pub fn qcd_index(&self) -> usize {
        match self.orientation {
            SubbandOrientation::LL | SubbandOrientation::HL => 0,
            SubbandOrientation::LH => 1,
            SubbandOrientation::HH => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub ppx: u8,
    pub ppy: u8,
    pub precincts_wide: u32,
    pub precincts_high: u32,
    pub bands: Vec<Band>,
}

impl Resolution {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn precinct_count(&self) -> usize {
        self.precincts_wide as usize * self.precincts_high as usize
    }
}

#[derive(Debug, Clone)]
pub struct TileComponent {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub levels: u8,
    /// Resolution 0 (lowest) first.
    pub resolutions: Vec<Resolution>,
}

impl TileComponent {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

/// Identifies one packet of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketId {
    pub layer: u16,
    pub resolution: u8,
    pub component: u16,
    pub precinct: u32,
}

/// Complete geometry of one tile.
#[derive(Debug, Clone)]
pub struct TileLayout {
    pub index: usize,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub components: Vec<TileComponent>,
    pub codeblocks: Vec<CodeBlockGeometry>,
}

fn ceil_shift(v: u64, s: u32) -> u64 {
    if s >= 64 {
        return u64::from(v > 0);
    }
    v.div_ceil(1u64 << s)
}

impl TileLayout {
    /// Builds the geometry of tile `index` with one coding style per component.
    pub fn new(siz: &J2kSiz, index: usize, styles: &[J2kCodingStyle]) -> Result<Self> {
        let (tx0, ty0, tx1, ty1) = siz.tile_rect(index);
        let mut components = Vec::with_capacity(siz.components.len());
        let mut codeblocks = Vec::new();

        for (c, info) in siz.components.iter().enumerate() {
            let style = &styles[c];
            let tcx0 = tx0.div_ceil(info.dx as u32) as u64;
            let tcy0 = ty0.div_ceil(info.dy as u32) as u64;
            let tcx1 = tx1.div_ceil(info.dx as u32) as u64;
            let tcy1 = ty1.div_ceil(info.dy as u32) as u64;
            let levels = style.levels as u32;

            let mut resolutions: Vec<Resolution> = Vec::with_capacity(levels as usize + 1);
            for r in 0..=levels {
                let shift = levels - r;
                let (rx0, ry0) = (ceil_shift(tcx0, shift), ceil_shift(tcy0, shift));
                let (rx1, ry1) = (ceil_shift(tcx1, shift), ceil_shift(tcy1, shift));
                let (ppx, ppy) = style.precinct(r as usize);
                if r > 0 && (ppx == 0 || ppy == 0) {
                    return Err(J2kError::invalid("zero precinct size above resolution 0"));
                }
                let (precincts_wide, precincts_high) = if rx1 > rx0 && ry1 > ry0 {
                    (
                        (rx1.div_ceil(1 << ppx) - (rx0 >> ppx)) as u32,
                        (ry1.div_ceil(1 << ppy) - (ry0 >> ppy)) as u32,
                    )
                } else {
                    (0, 0)
                };

                let orientations: &[SubbandOrientation] = if r == 0 {
                    &[SubbandOrientation::LL]
                } else {
                    &[
                        SubbandOrientation::HL,
                        SubbandOrientation::LH,
                        SubbandOrientation::HH,
                    ]
                };
                let (low_w, low_h) = match resolutions.last() {
                    Some(prev) => (prev.width(), prev.height()),
                    None => (0, 0),
                };

                let mut bands = Vec::with_capacity(orientations.len());
                for (b, &orientation) in orientations.iter().enumerate() {
                    let (bx0, by0, bx1, by1) = if r == 0 {
                        (rx0, ry0, rx1, ry1)
                    } else {
                        let nb = levels - r + 1;
                        let (xob, yob) = orientation.offsets();
                        let half = 1u64 << (nb - 1);
                        let band_coord = |v: u64, ob: u64| {
                            // ceil((v - half * ob) / 2^nb), never negative
                            (v + (1u64 << nb) - 1 - half * ob) >> nb
                        };
                        (
                            band_coord(tcx0, xob),
                            band_coord(tcy0, yob),
                            band_coord(tcx1, xob),
                            band_coord(tcy1, yob),
                        )
                    };
                    let (offset_x, offset_y) = match orientation {
                        SubbandOrientation::LL => (0, 0),
                        SubbandOrientation::HL => (low_w, 0),
                        SubbandOrientation::LH => (0, low_h),
                        SubbandOrientation::HH => (low_w, low_h),
                    };

                    let sub = u8::from(r > 0);
                    let xcb = style.cb_width_exp.min(ppx - sub) as u32;
                    let ycb = style.cb_height_exp.min(ppy - sub) as u32;
                    let (pw, ph) = ((ppx - sub) as u32, (ppy - sub) as u32);

                    let mut precincts = Vec::with_capacity(precincts_wide as usize * precincts_high as usize);
                    for py in 0..precincts_high as u64 {
                        for px in 0..precincts_wide as u64 {
                            let pbx0 = ((rx0 >> ppx) + px) << pw;
                            let pby0 = ((ry0 >> ppy) + py) << ph;
                            let (pbx1, pby1) = (pbx0 + (1 << pw), pby0 + (1 << ph));
                            let (cx0, cy0) = (pbx0.max(bx0), pby0.max(by0));
                            let (cx1, cy1) = (pbx1.min(bx1), pby1.min(by1));
                            let mut pb = PrecinctBand::default();
                            if cx1 > cx0 && cy1 > cy0 {
                                let (gx0, gx1) = (cx0 >> xcb, cx1.div_ceil(1 << xcb));
                                let (gy0, gy1) = (cy0 >> ycb, cy1.div_ceil(1 << ycb));
                                pb.cbs_wide = (gx1 - gx0) as u32;
                                pb.cbs_high = (gy1 - gy0) as u32;
                                for gy in gy0..gy1 {
                                    for gx in gx0..gx1 {
                                        let x0 = (gx << xcb).max(cx0);
                                        let y0 = (gy << ycb).max(cy0);
                                        let x1 = ((gx + 1) << xcb).min(cx1);
                                        let y1 = ((gy + 1) << ycb).min(cy1);
                                        pb.codeblocks.push(codeblocks.len());
                                        codeblocks.push(CodeBlockGeometry {
                                            component: c,
                                            resolution: r as usize,
                                            band: b,
                                            x0: x0 as u32,
                                            y0: y0 as u32,
                                            x1: x1 as u32,
                                            y1: y1 as u32,
                                            array_x: offset_x + (x0 - bx0) as u32,
                                            array_y: offset_y + (y0 - by0) as u32,
                                        });
                                    }
                                }
                            }
                            precincts.push(pb);
                        }
                    }

                    bands.push(Band {
                        orientation,
                        x0: bx0 as u32,
                        y0: by0 as u32,
                        x1: bx1 as u32,
                        y1: by1 as u32,
                        offset_x,
                        offset_y,
                        precincts,
                    });
                }

                resolutions.push(Resolution {
                    x0: rx0 as u32,
                    y0: ry0 as u32,
                    x1: rx1 as u32,
                    y1: ry1 as u32,
                    ppx,
                    ppy,
                    precincts_wide,
                    precincts_high,
                    bands,
                });
            }

            components.push(TileComponent {
                x0: tcx0 as u32,
                y0: tcy0 as u32,
                x1: tcx1 as u32,
                y1: tcy1 as u32,
                levels: style.levels,
                resolutions,
            });
        }

        Ok(Self {
            index,
            x0: tx0,
            y0: ty0,
            x1: tx1,
            y1: ty1,
            components,
            codeblocks,
        })
    }

    /// Packets of this tile in progression order (Annex B.12).
    pub fn packet_sequence(&self, siz: &J2kSiz, order: Order, layers: u16) -> Vec<PacketId> {
        let max_res = self
            .components
            .iter()
            .map(|tc| tc.levels as usize)
            .max()
            .unwrap_or(0);
        let mut seq = Vec::new();
        let push_precincts = |seq: &mut Vec<PacketId>, layer: u16, r: usize, c: usize| {
            if let Some(res) = self.components[c].resolutions.get(r) {
                for p in 0..res.precinct_count() as u32 {
                    seq.push(PacketId {
                        layer,
                        resolution: r as u8,
                        component: c as u16,
                        precinct: p,
                    });
                }
            }
        };

        match order {
            Order::Lrcp => {
                for l in 0..layers {
                    for r in 0..=max_res {
                        for c in 0..self.components.len() {
                            push_precincts(&mut seq, l, r, c);
                        }
                    }
                }
            }
            Order::Rlcp => {
                for r in 0..=max_res {
                    for l in 0..layers {
                        for c in 0..self.components.len() {
                            push_precincts(&mut seq, l, r, c);
                        }
                    }
                }
            }
            Order::Rpcl | Order::Pcrl | Order::Cprl => {
                // (key, component, resolution, precinct)
                let mut entries: Vec<([u64; 4], usize, usize, u32)> = Vec::new();
                for (c, tc) in self.components.iter().enumerate() {
                    let info = &siz.components[c];
                    for (r, res) in tc.resolutions.iter().enumerate() {
                        let shift = (tc.levels as usize - r) as u32;
                        for p in 0..res.precinct_count() as u32 {
                            let px = (p % res.precincts_wide) as u64;
                            let py = (p / res.precincts_wide) as u64;
                            let gx = (((res.x0 as u64 >> res.ppx) + px) << (res.ppx as u32 + shift))
                                * info.dx as u64;
                            let gy = (((res.y0 as u64 >> res.ppy) + py) << (res.ppy as u32 + shift))
                                * info.dy as u64;
                            let (x, y) = (gx.max(self.x0 as u64), gy.max(self.y0 as u64));
                            let (c64, r64) = (c as u64, r as u64);
                            let key = match order {
                                Order::Rpcl => [r64, y, x, c64],
                                Order::Pcrl => [y, x, c64, r64],
                                _ => [c64, y, x, r64],
                            };
                            entries.push((key, c, r, p));
                        }
                    }
                }
                entries.sort_by_key(|e| (e.0, e.3));
                for (_, c, r, p) in entries {
                    for l in 0..layers {
                        seq.push(PacketId {
                            layer: l,
                            resolution: r as u8,
                            component: c as u16,
                            precinct: p,
                        });
                    }
                }
            }
        }
        seq
    }
}
