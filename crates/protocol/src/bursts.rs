//! Bit layouts of the GSM downlink burst types.
//!
//! Offsets are in bits from the start of the 148-bit burst data part.

/// Standard tail bits.
pub const TB_LEN: usize = 3;
pub const TB_OS1: usize = 0;
pub const TB_OS2: usize = 145;
pub const TAIL_BITS: [u8; TB_LEN] = [0, 0, 0];

/// The frequency correction burst is broadcast in TS0 together with the SCH
/// and BCCH.  Every fixed bit, after differential encoding, is a 1, so the
/// phase advances by pi/2 per bit and the modulated burst is a pure tone at
/// (1625000 / 6) / 4 Hz above the channel center.
pub const FC_CODE_LEN: usize = 142;
pub const FC_OS: usize = 3;
pub const FC_FB: [u8; FC_CODE_LEN] = [0; FC_CODE_LEN];

/// Frequency correction burst including both tails (all zeros).
pub const FC_FB_TB: [u8; TB_LEN + FC_CODE_LEN + TB_LEN] = [0; TB_LEN + FC_CODE_LEN + TB_LEN];

/// The synchronization burst carries the TDMA frame number and the base
/// station identity code around a long training sequence chosen for its
/// correlation properties.  Broadcast in TS0 one frame after the frequency
/// correction burst.
pub const SB_CODE_LEN: usize = 64;
/// Offset from start of burst to the extended training sequence.
pub const SB_ETS_OS: usize = 42;
pub const SB_EDATA_LEN_1: usize = 39;
pub const SB_EDATA_OS_1: usize = 3;
pub const SB_EDATA_LEN_2: usize = 39;
pub const SB_EDATA_OS_2: usize = 106;
pub const SB_ETSC: [u8; SB_CODE_LEN] = [
    1, 0, 1, 1, 1, 0, 0, 1, 0, 1, 1, 0, 0, 0, 1, 0,
    0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1,
    0, 0, 1, 0, 1, 1, 0, 1, 0, 1, 0, 0, 0, 1, 0, 1,
    0, 1, 1, 1, 0, 1, 1, 0, 0, 0, 0, 1, 1, 0, 1, 1,
];

/// Normal-burst training sequence codes.
pub const N_TSC_NUM: usize = 8;
pub const N_TSC_CODE_LEN: usize = 26;
pub const N_TSC_OS: usize = 61;
pub const N_EDATA_LEN_1: usize = 58;
pub const N_EDATA_OS_1: usize = 3;
pub const N_EDATA_LEN_2: usize = 58;
pub const N_EDATA_OS_2: usize = 87;
pub const N_TSC: [[u8; N_TSC_CODE_LEN]; N_TSC_NUM] = [
    [
        0, 0, 1, 0, 0, 1, 0, 1, 1, 1, 0, 0, 0,
        0, 1, 0, 0, 0, 1, 0, 0, 1, 0, 1, 1, 1,
    ],
    [
        0, 0, 1, 0, 1, 1, 0, 1, 1, 1, 0, 1, 1,
        1, 1, 0, 0, 0, 1, 0, 0, 1, 0, 1, 1, 1,
    ],
    [
        0, 1, 0, 0, 0, 0, 1, 1, 1, 0, 1, 1, 1,
        0, 1, 0, 0, 1, 0, 0, 0, 0, 1, 1, 1, 0,
    ],
    [
        0, 1, 0, 0, 0, 1, 1, 1, 1, 0, 1, 1, 0,
        1, 0, 0, 0, 1, 0, 0, 0, 1, 1, 1, 1, 0,
    ],
    [
        0, 0, 0, 1, 1, 0, 1, 0, 1, 1, 1, 0, 0,
        1, 0, 0, 0, 0, 0, 1, 1, 0, 1, 0, 1, 1,
    ],
    [
        0, 1, 0, 0, 1, 1, 1, 0, 1, 0, 1, 1, 0,
        0, 0, 0, 0, 1, 0, 0, 1, 1, 1, 0, 1, 0,
    ],
    [
        1, 0, 1, 0, 0, 1, 1, 1, 1, 1, 0, 1, 1,
        0, 0, 0, 1, 0, 1, 0, 0, 1, 1, 1, 1, 1,
    ],
    [
        1, 1, 1, 0, 1, 1, 1, 1, 0, 0, 0, 1, 0,
        0, 1, 0, 1, 1, 1, 0, 1, 1, 1, 1, 0, 0,
    ],
];

/// Dummy-burst midamble.  A BTS transmits the dummy burst on C0 in every
/// timeslot no other channel claims.
pub const D_CODE_LEN: usize = 142;
pub const D_MB_OS: usize = 3;
pub const D_MB: [u8; D_CODE_LEN] = [
    1, 1, 1, 1, 1, 0, 1, 1, 0, 1, 1, 1, 0, 1, 1, 0,
    0, 0, 0, 0, 1, 0, 1, 0, 0, 1, 0, 0, 1, 1, 1, 0,
    0, 0, 0, 0, 1, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0,
    0, 0, 0, 1, 1, 1, 1, 1, 0, 0, 0, 1, 1, 1, 0, 0,
    0, 1, 0, 1, 1, 1, 0, 0, 0, 1, 0, 1, 1, 1, 0, 0,
    0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 0, 0, 1, 0, 1, 0,
    0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 1, 0, 0, 1,
    1, 1, 1, 0, 1, 0, 0, 1, 1, 1, 1, 1, 0, 0, 0, 1,
    0, 0, 1, 0, 1, 1, 1, 1, 1, 0, 1, 0, 1, 0,
];

/// Access burst: extended tail and synchronization sequence, used for random
/// access from a mobile.
pub const AB_ETB_CODE_LEN: usize = 8;
pub const AB_ETB_OS: usize = 0;
pub const AB_ETB: [u8; AB_ETB_CODE_LEN] = [0, 0, 1, 1, 1, 0, 1, 0];

pub const AB_SSB_CODE_LEN: usize = 41;
pub const AB_SSB_OS: usize = 8;
pub const AB_SSB: [u8; AB_SSB_CODE_LEN] = [
    0, 1, 0, 0, 1, 0, 1, 1, 0, 1, 1, 1, 1, 1, 1, 1,
    1, 0, 0, 1, 1, 0, 0, 1, 1, 0, 1, 0, 1, 0, 1, 0,
    0, 0, 1, 1, 1, 1, 0, 0, 0,
];

pub const AB_TS1_SSB: [u8; AB_SSB_CODE_LEN] = [
    0, 1, 0, 1, 0, 1, 0, 0, 1, 1, 1, 1, 1, 0, 0, 0,
    1, 0, 0, 0, 0, 1, 1, 0, 0, 0, 1, 0, 1, 1, 1, 1,
    0, 0, 1, 0, 0, 1, 1, 0, 1,
];

pub const AB_TS2_SSB: [u8; AB_SSB_CODE_LEN] = [
    1, 1, 1, 0, 1, 1, 1, 1, 0, 0, 1, 0, 0, 1, 1, 1,
    0, 1, 0, 1, 0, 1, 1, 0, 0, 0, 0, 0, 1, 1, 0, 1,
    1, 0, 1, 1, 1, 0, 1, 1, 1,
];
