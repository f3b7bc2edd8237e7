// Marker words of the Acqu raw format. All words are little-endian u32.

/// First word of the header record (and the embedded Mk2 flag)
pub const HEADER_BUFFER_MARKER: u32 = 0x10101010;
/// First word of every Mk1 data record
pub const MK1_DATA_BUFFER_MARKER: u32 = 0x20202020;
/// Trailer record written by the DAQ at end of run
pub const END_BUFFER_MARKER: u32 = 0x30303030;
/// First word of every Mk2 data record
pub const MK2_DATA_BUFFER_MARKER: u32 = 0x70707070;
pub const END_OF_EVENT_MARKER: u32 = 0xFFFFFFFF;
pub const END_OF_BUFFER_MARKER: u32 = 0xFFFFFFFF;
pub const SCALER_BLOCK_MARKER: u32 = 0xFEFEFEFE;
pub const EPICS_BLOCK_MARKER: u32 = 0xFDFDFDFD;
pub const READ_ERROR_MARKER: u32 = 0xEFEFEFEF;

/// Magic bytes opening an XZ container
pub const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

pub const WORD_SIZE: usize = 4;

/// Default size of the chunks pulled from a compressed file
pub const DEFAULT_XZ_BUFFER_SIZE: usize = 0x10000;

// First data buffer search
pub const MK2_SEARCH_UNIT: usize = 0x8000;
pub const MK2_SEARCH_OFFSETS: [usize; 3] = [1, 10, 16];
pub const MK2_SEARCH_MAX_MULTIPLIER: usize = 32;
pub const MK1_SEARCH_UNIT: usize = 0x2000;
pub const MK1_SEARCH_OFFSETS: [usize; 2] = [1, 4];
pub const MK1_SEARCH_MAX_MULTIPLIER: usize = 16;

// Module type flags in the header module table
pub const MODULE_TYPE_ADC: u32 = 0x1;
pub const MODULE_TYPE_SCALER: u32 = 0x2;

/// Known hardware module identifiers
pub fn module_name(module_id: u32) -> Option<&'static str> {
    match module_id {
        0xf001 => Some("KPH_I686"),
        0x0001 => Some("CBD_8210"),
        0x0100 => Some("LRS_1131"),
        0x0400 => Some("KPH_SMI"),
        0x0401 => Some("KPH_VITEC"),
        0x0302 => Some("CAEN_V792"),
        0x0304 => Some("CAEN_V874"),
        0x0305 => Some("CAEN_V1190"),
        0x0306 => Some("CAEN_V965"),
        0x0601 => Some("CATCH_TDC"),
        0x0603 => Some("GeSiCA"),
        0x0604 => Some("CATCH_TCS"),
        0x0700 => Some("GSI_VUPROM"),
        0x0701 => Some("GSI_VUPROMT"),
        0x0702 => Some("GSI_VUPROM_Scaler"),
        0x0703 => Some("GSI_VUPROM_Moeller"),
        0x0704 => Some("GSI_VUPROM_Pattern"),
        0x1fff => Some("CAMAC"),
        _ => None,
    }
}
