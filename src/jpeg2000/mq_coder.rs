//! MQ arithmetic coder (ISO/IEC 15444-1 Annex C).

/// One row of Table C.2: probability estimate and state transitions.
#[derive(Clone, Copy)]
struct MqState {
    qe: u32,
    nmps: u8,
    nlps: u8,
    switch: bool,
}

const fn s(qe: u32, nmps: u8, nlps: u8, switch: bool) -> MqState {
    MqState {
        qe,
        nmps,
        nlps,
        switch,
    }
}

#[rustfmt::skip]
const MQ_TABLE: [MqState; 47] = [
    s(0x5601, 1, 1, true),   s(0x3401, 2, 6, false),  s(0x1801, 3, 9, false),
    s(0x0AC1, 4, 12, false), s(0x0521, 5, 29, false), s(0x0221, 38, 33, false),
    s(0x5601, 7, 6, true),   s(0x5401, 8, 14, false), s(0x4801, 9, 14, false),
    s(0x3801, 10, 14, false), s(0x3001, 11, 17, false), s(0x2401, 12, 18, false),
    s(0x1C01, 13, 20, false), s(0x1601, 29, 21, false), s(0x5601, 15, 14, true),
    s(0x5401, 16, 14, false), s(0x5101, 17, 15, false), s(0x4801, 18, 16, false),
    s(0x3801, 19, 17, false), s(0x3401, 20, 18, false), s(0x3001, 21, 19, false),
    s(0x2801, 22, 19, false), s(0x2401, 23, 20, false), s(0x2201, 24, 21, false),
    s(0x1C01, 25, 22, false), s(0x1801, 26, 23, false), s(0x1601, 27, 24, false),
    s(0x1401, 28, 25, false), s(0x1201, 29, 26, false), s(0x1101, 30, 27, false),
    s(0x0AC1, 31, 28, false), s(0x09C1, 32, 29, false), s(0x08A1, 33, 30, false),
    s(0x0521, 34, 31, false), s(0x0441, 35, 32, false), s(0x02A1, 36, 33, false),
    s(0x0221, 37, 34, false), s(0x0141, 38, 35, false), s(0x0111, 39, 36, false),
    s(0x0085, 40, 37, false), s(0x0049, 41, 38, false), s(0x0025, 42, 39, false),
    s(0x0015, 43, 40, false), s(0x0009, 44, 41, false), s(0x0005, 45, 42, false),
    s(0x0001, 45, 43, false), s(0x5601, 46, 46, false),
];

/// Adaptive probability state of one coding context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MqContext {
    index: u8,
    mps: u8,
}

impl MqContext {
    pub const fn with_state(index: u8) -> Self {
        Self { index, mps: 0 }
    }

    fn state(&self) -> &'static MqState {
        &MQ_TABLE[self.index as usize]
    }

    fn next_mps(&mut self) {
        self.index = self.state().nmps;
    }

    fn next_lps(&mut self) {
        let st = self.state();
        if st.switch {
            self.mps ^= 1;
        }
        self.index = st.nlps;
    }
}

/// MQ encoder producing one terminated codeword segment.
pub struct MqEncoder {
    a: u32,
    c: u32,
    ct: u32,
    /// `buf[0]` is the byte preceding the segment; it never carries output.
    buf: Vec<u8>,
}

impl Default for MqEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MqEncoder {
    pub fn new() -> Self {
        Self {
            a: 0x8000,
            c: 0,
            ct: 12,
            buf: vec![0],
        }
    }

    /// Bytes emitted so far, excluding what is still held in the registers.
    pub fn bytes_written(&self) -> usize {
        self.buf.len() - 1
    }

    pub fn encode(&mut self, cx: &mut MqContext, bit: u32) {
        let qe = cx.state().qe;
        self.a -= qe;
        if bit as u8 == cx.mps {
            if self.a & 0x8000 == 0 {
                if self.a < qe {
                    self.a = qe;
                } else {
                    self.c += qe;
                }
                cx.next_mps();
                self.renormalize();
            } else {
                self.c += qe;
            }
        } else {
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }
            cx.next_lps();
            self.renormalize();
        }
    }

    fn renormalize(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    fn byte_out(&mut self) {
        let last = self.buf.len() - 1;
        if self.buf[last] == 0xFF {
            self.buf.push((self.c >> 20) as u8);
            self.c &= 0xF_FFFF;
            self.ct = 7;
        } else if self.c & 0x800_0000 == 0 {
            self.buf.push((self.c >> 19) as u8);
            self.c &= 0x7_FFFF;
            self.ct = 8;
        } else {
            self.buf[last] += 1;
            if self.buf[last] == 0xFF {
                self.c &= 0x7FF_FFFF;
                self.buf.push((self.c >> 20) as u8);
                self.c &= 0xF_FFFF;
                self.ct = 7;
            } else {
                self.buf.push((self.c >> 19) as u8);
                self.c &= 0x7_FFFF;
                self.ct = 8;
            }
        }
    }

    /// Terminates the segment (Annex C.2.9) and returns its bytes.
    pub fn flush(mut self) -> Vec<u8> {
        let temp = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= temp {
            self.c -= 0x8000;
        }
        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();
        if self.buf.last() == Some(&0xFF) {
            self.buf.pop();
        }
        self.buf.remove(0);
        self.buf
    }
}

/// MQ decoder over one codeword segment. Bytes past the end read as `0xFF`.
pub struct MqDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    a: u32,
    c: u32,
    ct: u32,
}

impl<'a> MqDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut dec = Self {
            data,
            pos: 0,
            a: 0,
            c: 0,
            ct: 0,
        };
        dec.c = (dec.byte_at(0) as u32) << 16;
        dec.byte_in();
        dec.c <<= 7;
        dec.ct -= 7;
        dec.a = 0x8000;
        dec
    }

    fn byte_at(&self, i: usize) -> u8 {
        self.data.get(i).copied().unwrap_or(0xFF)
    }

    fn byte_in(&mut self) {
        if self.byte_at(self.pos) == 0xFF {
            let next = self.byte_at(self.pos + 1);
            if next > 0x8F {
                self.c = self.c.wrapping_add(0xFF00);
                self.ct = 8;
            } else {
                self.pos += 1;
                self.c = self.c.wrapping_add((next as u32) << 9);
                self.ct = 7;
            }
        } else {
            self.pos += 1;
            self.c = self.c.wrapping_add((self.byte_at(self.pos) as u32) << 8);
            self.ct = 8;
        }
    }

    fn renormalize(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    pub fn decode(&mut self, cx: &mut MqContext) -> u32 {
        let qe = cx.state().qe;
        self.a -= qe;
        let d;
        if (self.c >> 16) < qe {
            // LPS exchange
            if self.a < qe {
                d = cx.mps;
                cx.next_mps();
            } else {
                d = cx.mps ^ 1;
                cx.next_lps();
            }
            self.a = qe;
            self.renormalize();
        } else {
            self.c -= qe << 16;
            if self.a & 0x8000 == 0 {
                // MPS exchange
                if self.a < qe {
                    d = cx.mps ^ 1;
                    cx.next_lps();
                } else {
                    d = cx.mps;
                    cx.next_mps();
                }
                self.renormalize();
            } else {
                d = cx.mps;
            }
        }
        d as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_random_bits(n: usize, seed: u32) -> Vec<u32> {
        let mut x = seed;
        (0..n)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                // Skewed so contexts adapt.
                u32::from(x % 7 == 0)
            })
            .collect()
    }

    #[test]
    fn test_round_trip_multiple_contexts() {
        let bits = pseudo_random_bits(5000, 0x1234_5678);
        let mut enc_cx = [MqContext::default(), MqContext::with_state(3), MqContext::with_state(46)];
        let mut enc = MqEncoder::new();
        for (i, &b) in bits.iter().enumerate() {
            enc.encode(&mut enc_cx[i % 3], b);
        }
        let data = enc.flush();
        assert!(data.len() < bits.len() / 8);

        let mut dec_cx = [MqContext::default(), MqContext::with_state(3), MqContext::with_state(46)];
        let mut dec = MqDecoder::new(&data);
        for (i, &b) in bits.iter().enumerate() {
            assert_eq!(dec.decode(&mut dec_cx[i % 3]), b, "bit {i}");
        }
    }

    #[test]
    fn test_all_ones_and_empty_segments() {
        let mut cx = MqContext::default();
        let mut enc = MqEncoder::new();
        for _ in 0..300 {
            enc.encode(&mut cx, 1);
        }
        let data = enc.flush();
        let mut cx = MqContext::default();
        let mut dec = MqDecoder::new(&data);
        for _ in 0..300 {
            assert_eq!(dec.decode(&mut cx), 1);
        }

        let empty = MqEncoder::new().flush();
        assert!(empty.len() <= 2);
    }

    #[test]
    fn test_no_marker_codes_in_output() {
        let bits = pseudo_random_bits(20000, 99);
        let mut cx = MqContext::default();
        let mut enc = MqEncoder::new();
        for &b in &bits {
            enc.encode(&mut cx, b ^ 1);
        }
        let data = enc.flush();
        for w in data.windows(2) {
            assert!(!(w[0] == 0xFF && w[1] > 0x8F));
        }
    }
}
