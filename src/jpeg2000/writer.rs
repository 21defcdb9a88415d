//! Codestream writer: SOC, SIZ, COD, QCD/QCC, COM, TLM, tile-parts and EOC.

use super::bit_io::ByteWriter;
use super::image::{J2kCod, J2kQuantization, J2kSiz, QUANT_NONE, SCOD_PRECINCTS};
use super::markers::J2kMarker;

/// Bytes a tile-part adds around its packet data (SOT segment + SOD).
pub const TILE_PART_OVERHEAD: usize = 14;

#[derive(Default)]
pub struct J2kWriter {
    writer: ByteWriter,
}

impl J2kWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.writer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writer.is_empty()
    }

    /// SOC through COM. QCC segments follow QCD for components whose
    /// quantization differs from component 0.
    pub fn write_main_header(
        &mut self,
        siz: &J2kSiz,
        cod: &J2kCod,
        quant: &[J2kQuantization],
        comment: Option<&str>,
    ) {
        self.writer.write_marker(J2kMarker::StartOfCodestream);
        self.write_siz(siz);
        self.write_cod(cod);
        if let Some(first) = quant.first() {
            self.write_qcd(J2kMarker::QuantizationDefault, None, first, siz.components.len());
            for (c, q) in quant.iter().enumerate().skip(1) {
                if q != first {
                    self.write_qcd(J2kMarker::QuantizationComponent, Some(c), q, siz.components.len());
                }
            }
        }
        if let Some(text) = comment {
            self.write_com(text);
        }
    }

    pub fn write_siz(&mut self, siz: &J2kSiz) {
        let w = &mut self.writer;
        w.write_marker(J2kMarker::ImageAndTileSize);
        w.write_u16(38 + 3 * siz.components.len() as u16);
        w.write_u16(siz.rsiz);
        w.write_u32(siz.x1);
        w.write_u32(siz.y1);
        w.write_u32(siz.x0);
        w.write_u32(siz.y0);
        w.write_u32(siz.tile_width);
        w.write_u32(siz.tile_height);
        w.write_u32(siz.tile_x0);
        w.write_u32(siz.tile_y0);
        w.write_u16(siz.components.len() as u16);
        for c in &siz.components {
            w.write_u8((c.depth - 1) | if c.signed { 0x80 } else { 0 });
            w.write_u8(c.dx);
            w.write_u8(c.dy);
        }
    }

    pub fn write_cod(&mut self, cod: &J2kCod) {
        let style = &cod.style;
        let precincts = cod.scod & SCOD_PRECINCTS != 0;
        let w = &mut self.writer;
        w.write_marker(J2kMarker::CodingStyleDefault);
        let extra = if precincts { style.levels as u16 + 1 } else { 0 };
        w.write_u16(12 + extra);
        w.write_u8(cod.scod);
        w.write_u8(cod.order.into());
        w.write_u16(cod.layers);
        w.write_u8(cod.mct);
        w.write_u8(style.levels);
        w.write_u8(style.cb_width_exp - 2);
        w.write_u8(style.cb_height_exp - 2);
        w.write_u8(style.cb_style);
        w.write_u8(u8::from(style.reversible));
        if precincts {
            for r in 0..=style.levels as usize {
                let (ppx, ppy) = style.precinct(r);
                w.write_u8((ppy << 4) | ppx);
            }
        }
    }

    fn write_qcd(
        &mut self,
        marker: J2kMarker,
        component: Option<usize>,
        q: &J2kQuantization,
        components: usize,
    ) {
        let index_len = match component {
            None => 0,
            Some(_) if components < 257 => 1,
            Some(_) => 2,
        };
        let step_len = if q.style == QUANT_NONE { 1 } else { 2 };
        let w = &mut self.writer;
        w.write_marker(marker);
        w.write_u16((3 + index_len + step_len * q.steps.len()) as u16);
        match (component, index_len) {
            (Some(c), 1) => w.write_u8(c as u8),
            (Some(c), _) => w.write_u16(c as u16),
            (None, _) => {}
        }
        w.write_u8((q.guard_bits << 5) | q.style);
        for &(eps, mu) in &q.steps {
            if q.style == QUANT_NONE {
                w.write_u8(eps << 3);
            } else {
                w.write_u16(((eps as u16) << 11) | mu);
            }
        }
    }

    pub fn write_com(&mut self, text: &str) {
        let w = &mut self.writer;
        w.write_marker(J2kMarker::Comment);
        w.write_u16(4 + text.len() as u16);
        w.write_u16(1);
        w.write_bytes(text.as_bytes());
    }

    /// TLM with 8-bit tile indices and 32-bit tile-part lengths.
    pub fn write_tlm(&mut self, parts: &[(u8, u32)]) {
        let w = &mut self.writer;
        w.write_marker(J2kMarker::TilePartLengths);
        w.write_u16(4 + 5 * parts.len() as u16);
        w.write_u8(0);
        w.write_u8(0x50);
        for &(tile, len) in parts {
            w.write_u8(tile);
            w.write_u32(len);
        }
    }

    pub fn write_tile_part(&mut self, tile: u16, part: u8, parts: u8, data: &[u8]) {
        let w = &mut self.writer;
        w.write_marker(J2kMarker::StartOfTile);
        w.write_u16(10);
        w.write_u16(tile);
        w.write_u32((TILE_PART_OVERHEAD + data.len()) as u32);
        w.write_u8(part);
        w.write_u8(parts);
        w.write_marker(J2kMarker::StartOfData);
        w.write_bytes(data);
    }

    /// Appends EOC and returns the codestream.
    pub fn finish(mut self) -> Vec<u8> {
        self.writer.write_marker(J2kMarker::EndOfCodestream);
        self.writer.into_inner()
    }
}
