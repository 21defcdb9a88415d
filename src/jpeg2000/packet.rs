//! Tier-2: packet headers and bodies (ISO/IEC 15444-1 Annex B.9 - B.10).

use super::bit_io::{J2kBitReader, J2kBitWriter};
use super::bit_plane_coder::{CBLK_TERMALL, EncodedBlock};
use super::image::{PacketId, TileLayout};
use super::markers::J2kMarker;
use super::tag_tree::TagTree;
use crate::error::{J2kError, Result};

/// Tag trees of one band inside one precinct.
pub struct PrecinctState {
    pub inclusion_tree: TagTree,
    pub zero_bp_tree: TagTree,
}

impl PrecinctState {
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            inclusion_tree: TagTree::new(w, h),
            zero_bp_tree: TagTree::new(w, h),
        }
    }
}

/// Per-tile tier-2 state: tag trees indexed `[component][resolution][precinct][band]`.
struct TileTrees {
    trees: Vec<Vec<Vec<Vec<PrecinctState>>>>,
}

impl TileTrees {
    fn new(tile: &TileLayout) -> Self {
        let trees = tile
            .components
            .iter()
            .map(|tc| {
                tc.resolutions
                    .iter()
                    .map(|res| {
                        (0..res.precinct_count())
                            .map(|p| {
                                res.bands
                                    .iter()
                                    .map(|band| {
                                        let pb = &band.precincts[p];
                                        PrecinctState::new(pb.cbs_wide as usize, pb.cbs_high as usize)
                                    })
                                    .collect()
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Self { trees }
    }

    fn precinct(&mut self, id: PacketId) -> Result<&mut Vec<PrecinctState>> {
        self.trees
            .get_mut(id.component as usize)
            .and_then(|c| c.get_mut(id.resolution as usize))
            .and_then(|r| r.get_mut(id.precinct as usize))
            .ok_or_else(|| J2kError::invalid("packet refers to a missing precinct"))
    }
}

fn write_pass_count(w: &mut J2kBitWriter, n: usize) {
    match n {
        1 => w.write_bit(0),
        2 => w.write_bits(0b10, 2),
        3..=5 => w.write_bits((0b11 << 2) | (n - 3) as u32, 4),
        6..=36 => w.write_bits((0b1111 << 5) | (n - 6) as u32, 9),
        _ => w.write_bits((0x1FF << 7) | (n - 37) as u32, 16),
    }
}

fn read_pass_count(r: &mut J2kBitReader) -> Result<usize> {
    if r.read_bit()? == 0 {
        return Ok(1);
    }
    if r.read_bit()? == 0 {
        return Ok(2);
    }
    let v = r.read_bits(2)? as usize;
    if v < 3 {
        return Ok(3 + v);
    }
    let v = r.read_bits(5)? as usize;
    if v < 31 {
        return Ok(6 + v);
    }
    Ok(37 + r.read_bits(7)? as usize)
}

fn floor_log2(n: usize) -> u32 {
    usize::BITS - 1 - n.leading_zeros()
}

fn bits_for(v: usize) -> u32 {
    usize::BITS - v.leading_zeros()
}

/// What one code-block contributes to the packets of its tile.
pub struct BlockContribution<'a> {
    pub block: &'a EncodedBlock,
    /// Missing most-significant bit-planes, `M_b - num_bps`.
    pub zero_planes: u32,
    /// Passes included once each layer is complete (non-decreasing).
    pub layer_passes: Vec<usize>,
}

impl BlockContribution<'_> {
    fn byte_at(&self, passes: usize) -> usize {
        if passes == 0 {
            0
        } else {
            self.block.passes[passes - 1].end
        }
    }

    fn first_layer(&self, layers: u16) -> u32 {
        self.layer_passes
            .iter()
            .position(|&p| p > 0)
            .unwrap_or(layers as usize) as u32
    }
}

/// Writes every packet of a tile. Returns one byte string per entry of `sequence`.
///
/// Blocks are expected to be coded with [`CBLK_TERMALL`] when `termall` is set,
/// in which case every pass length is signalled separately.
pub fn encode_tile_packets(
    tile: &TileLayout,
    sequence: &[PacketId],
    blocks: &[BlockContribution],
    layers: u16,
    termall: bool,
) -> Result<Vec<Vec<u8>>> {
    let mut trees = TileTrees::new(tile);
    for (c, tc) in tile.components.iter().enumerate() {
        for (r, res) in tc.resolutions.iter().enumerate() {
            for p in 0..res.precinct_count() {
                for (b, band) in res.bands.iter().enumerate() {
                    let state = &mut trees.trees[c][r][p][b];
                    for (leaf, &cb) in band.precincts[p].codeblocks.iter().enumerate() {
                        let contribution = &blocks[cb];
                        state.inclusion_tree.set_value(leaf, contribution.first_layer(layers));
                        state.zero_bp_tree.set_value(leaf, contribution.zero_planes);
                    }
                }
            }
        }
    }

    let mut coded_passes = vec![0usize; blocks.len()];
    let mut lblock = vec![3u32; blocks.len()];
    let mut packets = Vec::with_capacity(sequence.len());

    for &id in sequence {
        let res = &tile.components[id.component as usize].resolutions[id.resolution as usize];
        let layer = id.layer as usize;
        let states = trees.precinct(id)?;
        let mut header = J2kBitWriter::new();
        let mut body = Vec::new();

        let any_new = res.bands.iter().any(|band| {
            band.precincts[id.precinct as usize]
                .codeblocks
                .iter()
                .any(|&cb| blocks[cb].layer_passes[layer] > coded_passes[cb])
        });
        if !any_new {
            header.write_bit(0);
            packets.push(header.finish());
            continue;
        }
        header.write_bit(1);

        for (b, band) in res.bands.iter().enumerate() {
            let state = &mut states[b];
            for (leaf, &cb) in band.precincts[id.precinct as usize].codeblocks.iter().enumerate() {
                let contribution = &blocks[cb];
                let before = coded_passes[cb];
                let after = contribution.layer_passes[layer];
                let new_passes = after - before;

                if before == 0 {
                    state.inclusion_tree.encode(&mut header, leaf, layer as u32 + 1);
                    if new_passes == 0 {
                        continue;
                    }
                    state.zero_bp_tree.encode(&mut header, leaf, u32::MAX);
                } else {
                    header.write_bit(u32::from(new_passes > 0));
                    if new_passes == 0 {
                        continue;
                    }
                }
                write_pass_count(&mut header, new_passes);

                let lengths: Vec<(usize, usize)> = if termall {
                    (before..after)
                        .map(|k| (contribution.byte_at(k + 1) - contribution.byte_at(k), 1))
                        .collect()
                } else {
                    vec![(contribution.byte_at(after) - contribution.byte_at(before), new_passes)]
                };
                let needed = lengths
                    .iter()
                    .map(|&(len, n)| bits_for(len).saturating_sub(floor_log2(n)))
                    .max()
                    .unwrap_or(0);
                let increment = needed.saturating_sub(lblock[cb]);
                for _ in 0..increment {
                    header.write_bit(1);
                }
                header.write_bit(0);
                lblock[cb] += increment;
                for &(len, n) in &lengths {
                    header.write_bits(len as u32, lblock[cb] + floor_log2(n));
                }

                body.extend_from_slice(
                    &contribution.block.data[contribution.byte_at(before)..contribution.byte_at(after)],
                );
                coded_passes[cb] = after;
            }
        }

        let mut packet = header.finish();
        packet.extend_from_slice(&body);
        packets.push(packet);
    }
    Ok(packets)
}

/// Codeword segments gathered for one code-block while reading packets.
#[derive(Debug, Clone, Default)]
pub struct BlockSegments {
    pub included: bool,
    pub zero_planes: u32,
    pub lblock: u32,
    pub passes: usize,
    /// Segment bytes and the passes each holds.
    pub segments: Vec<(Vec<u8>, usize)>,
}

impl BlockSegments {
    /// Borrowed view suitable for [`decode_code_block`](super::bit_plane_coder::decode_code_block).
    pub fn as_slices(&self) -> Vec<(&[u8], usize)> {
        self.segments.iter().map(|(d, n)| (d.as_slice(), *n)).collect()
    }
}

/// How the packets of a tile are framed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketFraming {
    pub sop: bool,
    pub eph: bool,
}

/// Reads the packets of one tile in `sequence` order from the concatenated
/// tile-part bodies. Code-block styles are per component.
///
/// Data ending on a packet boundary leaves the remaining packets empty.
pub fn decode_tile_packets(
    data: &[u8],
    tile: &TileLayout,
    sequence: &[PacketId],
    cb_styles: &[u8],
    framing: PacketFraming,
) -> Result<Vec<BlockSegments>> {
    let mut trees = TileTrees::new(tile);
    let mut blocks = vec![
        BlockSegments {
            lblock: 3,
            ..BlockSegments::default()
        };
        tile.codeblocks.len()
    ];
    let mut pos = 0;

    for &id in sequence {
        if pos >= data.len() {
            log::trace!("tile {}: data ends before packet {id:?}", tile.index);
            break;
        }
        if framing.sop && data[pos..].starts_with(&J2kMarker::StartOfPacket.code().to_be_bytes()) {
            pos += 6;
        }
        let res = tile
            .components
            .get(id.component as usize)
            .and_then(|tc| tc.resolutions.get(id.resolution as usize))
            .ok_or_else(|| J2kError::invalid("packet refers to a missing resolution"))?;
        let termall = cb_styles[id.component as usize] & CBLK_TERMALL != 0;
        let layer = id.layer as u32;
        let states = trees.precinct(id)?;

        let mut reader = J2kBitReader::new(data.get(pos..).unwrap_or(&[]));
        // (code-block, segment lengths with passes)
        let mut pending: Vec<(usize, Vec<(usize, usize)>)> = Vec::new();
        if reader.read_bit()? == 1 {
            for (b, band) in res.bands.iter().enumerate() {
                let state = &mut states[b];
                for (leaf, &cb) in band.precincts[id.precinct as usize].codeblocks.iter().enumerate() {
                    let block = &mut blocks[cb];
                    if !block.included {
                        if !state.inclusion_tree.decode(&mut reader, leaf, layer + 1)? {
                            continue;
                        }
                        let mut t = 1;
                        while !state.zero_bp_tree.decode(&mut reader, leaf, t)? {
                            t += 1;
                            if t > 64 {
                                return Err(J2kError::invalid("zero bit-plane count out of range"));
                            }
                        }
                        block.zero_planes = t - 1;
                        block.included = true;
                    } else if reader.read_bit()? == 0 {
                        continue;
                    }

                    let new_passes = read_pass_count(&mut reader)?;
                    while reader.read_bit()? == 1 {
                        block.lblock += 1;
                        if block.lblock > 32 {
                            return Err(J2kError::invalid("code-block length indicator overflow"));
                        }
                    }
                    let lengths = if termall {
                        let mut v = Vec::with_capacity(new_passes);
                        for _ in 0..new_passes {
                            v.push((reader.read_bits(block.lblock)? as usize, 1));
                        }
                        v
                    } else {
                        let bits = block.lblock + floor_log2(new_passes);
                        vec![(reader.read_bits(bits)? as usize, new_passes)]
                    };
                    pending.push((cb, lengths));
                }
            }
        }
        pos += reader.finish();
        if framing.eph && data[pos.min(data.len())..].starts_with(&J2kMarker::EndOfPacketHeader.code().to_be_bytes()) {
            pos += 2;
        }

        for (cb, lengths) in pending {
            let block = &mut blocks[cb];
            for (len, n) in lengths {
                let bytes = data
                    .get(pos..pos + len)
                    .ok_or(J2kError::Truncated("packet body"))?;
                pos += len;
                // Without per-pass termination one segment spans every layer.
                match block.segments.last_mut() {
                    Some((seg, passes)) if !termall => {
                        seg.extend_from_slice(bytes);
                        *passes += n;
                    }
                    Some(_) | None => block.segments.push((bytes.to_vec(), n)),
                }
                block.passes += n;
            }
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Order;
    use crate::jpeg2000::bit_plane_coder::{decode_code_block, encode_code_block};
    use crate::jpeg2000::image::{J2kCodingStyle, J2kComponentInfo, J2kSiz};

    #[test]
    fn test_pass_count_codewords() {
        let counts = [1, 2, 3, 5, 6, 20, 36, 37, 100, 164];
        let mut w = J2kBitWriter::new();
        for &n in &counts {
            write_pass_count(&mut w, n);
        }
        let bytes = w.finish();
        let mut r = J2kBitReader::new(&bytes);
        for &n in &counts {
            assert_eq!(read_pass_count(&mut r).unwrap(), n);
        }
    }

    fn setup(order: Order) -> (J2kSiz, TileLayout, Vec<PacketId>) {
        let siz = J2kSiz {
            x1: 40,
            y1: 24,
            tile_width: 40,
            tile_height: 24,
            components: vec![
                J2kComponentInfo {
                    depth: 8,
                    signed: false,
                    dx: 1,
                    dy: 1
                };
                2
            ],
            ..J2kSiz::default()
        };
        let style = J2kCodingStyle {
            levels: 2,
            cb_width_exp: 3,
            cb_height_exp: 3,
            cb_style: CBLK_TERMALL,
            precincts: vec![(3, 3), (3, 3), (4, 4)],
            ..J2kCodingStyle::default()
        };
        let tile = TileLayout::new(&siz, 0, &[style.clone(), style]).unwrap();
        let seq = tile.packet_sequence(&siz, order, 3);
        (siz, tile, seq)
    }

    #[test]
    fn test_packets_round_trip_across_layers() {
        for order in [Order::Lrcp, Order::Rpcl, Order::Cprl] {
            let (_, tile, seq) = setup(order);
            let encoded: Vec<EncodedBlock> = tile
                .codeblocks
                .iter()
                .enumerate()
                .map(|(i, cb)| {
                    let n = (cb.width() * cb.height()) as usize;
                    let coeffs: Vec<i32> = (0..n)
                        .map(|k| if (k + i) % 3 == 0 { 0 } else { ((k * 31 + i * 7) % 90) as i32 - 45 })
                        .collect();
                    encode_code_block(&coeffs, cb.width() as usize, cb.height() as usize, Default::default(), CBLK_TERMALL)
                })
                .collect();
            // Some blocks skip the first layer entirely; some never finish.
            let contributions: Vec<BlockContribution> = encoded
                .iter()
                .enumerate()
                .map(|(i, block)| {
                    let total = block.passes.len();
                    let layer_passes = match i % 3 {
                        0 => vec![total / 3, 2 * total / 3, total],
                        1 => vec![0, total / 2, total / 2],
                        _ => vec![0, 0, total],
                    };
                    BlockContribution {
                        block,
                        zero_planes: 10 - block.num_bps as u32,
                        layer_passes,
                    }
                })
                .collect();
            let packets = encode_tile_packets(&tile, &seq, &contributions, 3, true).unwrap();
            let stream: Vec<u8> = packets.concat();

            let styles = [CBLK_TERMALL; 2];
            let decoded = decode_tile_packets(&stream, &tile, &seq, &styles, PacketFraming::default()).unwrap();
            for (i, (d, c)) in decoded.iter().zip(&contributions).enumerate() {
                let expected = *c.layer_passes.last().unwrap();
                assert_eq!(d.passes, expected, "{order:?} block {i}");
                if expected > 0 {
                    assert_eq!(d.zero_planes, c.zero_planes);
                    let cb = &tile.codeblocks[i];
                    let values = decode_code_block(
                        &d.as_slices(),
                        cb.width() as usize,
                        cb.height() as usize,
                        Default::default(),
                        c.block.num_bps,
                        CBLK_TERMALL,
                    )
                    .unwrap();
                    if expected == c.block.passes.len() {
                        let n = values.len();
                        let original: Vec<i32> = (0..n)
                            .map(|k| if (k + i) % 3 == 0 { 0 } else { ((k * 31 + i * 7) % 90) as i32 - 45 })
                            .collect();
                        let got: Vec<i32> = values.iter().map(|v| v / 2).collect();
                        assert_eq!(got, original);
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty_packets_and_truncation() {
        let (_, tile, seq) = setup(Order::Lrcp);
        let none = EncodedBlock::default();
        let contributions: Vec<BlockContribution> = tile
            .codeblocks
            .iter()
            .map(|_| BlockContribution {
                block: &none,
                zero_planes: 0,
                layer_passes: vec![0, 0, 0],
            })
            .collect();
        let packets = encode_tile_packets(&tile, &seq, &contributions, 3, true).unwrap();
        assert!(packets.iter().all(|p| p == &[0u8]));

        let styles = [CBLK_TERMALL; 2];
        let decoded = decode_tile_packets(&[], &tile, &seq, &styles, PacketFraming::default()).unwrap();
        assert!(decoded.iter().all(|b| b.passes == 0));
        // A header promising more body than exists is an error.
        assert!(decode_tile_packets(&[0xFF, 0x7F, 0xFF], &tile, &seq, &styles, PacketFraming::default()).is_err());
    }
}
