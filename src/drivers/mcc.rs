use std::ffi::CStr;
use std::os::raw::{c_char, c_float, c_int, c_ushort};

use libloading::Library;
use once_cell::sync::OnceCell;

use crate::drivers::{AnalogRange, Daq, DaqError, DigitalPort, PortDirection};

#[cfg(target_pointer_width = "64")]
const UL_LIBRARY: &str = "cbw64.dll";
#[cfg(not(target_pointer_width = "64"))]
const UL_LIBRARY: &str = "cbw32.dll";

const NOERRORS: c_int = 0;
const ERRSTRLEN: usize = 256;

/// Function table of the Measurement Computing Universal Library.
struct UlApi {
    #[allow(dead_code)]
    lib: Library,
    d_config_port: unsafe extern "system" fn(c_int, c_int, c_int) -> c_int,
    d_bit_out: unsafe extern "system" fn(c_int, c_int, c_int, c_ushort) -> c_int,
    a_in: unsafe extern "system" fn(c_int, c_int, c_int, *mut c_ushort) -> c_int,
    to_eng_units: unsafe extern "system" fn(c_int, c_int, c_ushort, *mut c_float) -> c_int,
    get_err_msg: unsafe extern "system" fn(c_int, *mut c_char) -> c_int,
}

impl UlApi {
    fn load() -> Result<Self, DaqError> {
        // InstaCal installs the library on the system path.
        let lib = unsafe { Library::new(UL_LIBRARY) }
            .map_err(|e| DaqError::LibraryUnavailable(format!("{UL_LIBRARY}: {e}")))?;
        let missing = |e: libloading::Error| DaqError::LibraryUnavailable(e.to_string());
        // Safety: signatures follow cbw.h of the Universal Library.
        let (d_config_port, d_bit_out, a_in, to_eng_units, get_err_msg) = unsafe {
            (
                *lib.get(b"cbDConfigPort\0").map_err(missing)?,
                *lib.get(b"cbDBitOut\0").map_err(missing)?,
                *lib.get(b"cbAIn\0").map_err(missing)?,
                *lib.get(b"cbToEngUnits\0").map_err(missing)?,
                *lib.get(b"cbGetErrMsg\0").map_err(missing)?,
            )
        };
        Ok(Self {
            lib,
            d_config_port,
            d_bit_out,
            a_in,
            to_eng_units,
            get_err_msg,
        })
    }

    fn instance() -> Result<&'static UlApi, DaqError> {
        static API: OnceCell<UlApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }

    fn check(&self, code: c_int, func: &'static str) -> Result<(), DaqError> {
        if code == NOERRORS {
            return Ok(());
        }
        let mut buf = [0 as c_char; ERRSTRLEN];
        let message = unsafe {
            (self.get_err_msg)(code, buf.as_mut_ptr());
            CStr::from_ptr(buf.as_ptr()).to_string_lossy().trim().to_string()
        };
        Err(DaqError::Call {
            func,
            code,
            message,
        })
    }
}

/// A board registered in InstaCal (e.g. USB-1208LS), addressed by board number.
pub struct MccBoard {
    api: &'static UlApi,
    board_num: c_int,
}

impl MccBoard {
    pub fn open(board_num: i32) -> Result<Self, DaqError> {
        let api = UlApi::instance()?;
        log::info!("Using Universal Library board {board_num}");
        Ok(Self { api, board_num })
    }
}

impl Daq for MccBoard {
    fn configure_port(
        &mut self,
        port: DigitalPort,
        direction: PortDirection,
    ) -> Result<(), DaqError> {
        let code = unsafe { (self.api.d_config_port)(self.board_num, port.code(), direction.code()) };
        self.api.check(code, "cbDConfigPort")
    }

    fn write_bit(&mut self, port: DigitalPort, bit: u8, high: bool) -> Result<(), DaqError> {
        let code = unsafe {
            (self.api.d_bit_out)(
                self.board_num,
                port.code(),
                c_int::from(bit),
                if high { 1 } else { 0 },
            )
        };
        self.api.check(code, "cbDBitOut")
    }

    fn analog_in(&mut self, channel: u8, range: AnalogRange) -> Result<u16, DaqError> {
        let mut counts: c_ushort = 0;
        let code = unsafe {
            (self.api.a_in)(
                self.board_num,
                c_int::from(channel),
                range.code(),
                &mut counts as *mut c_ushort,
            )
        };
        self.api.check(code, "cbAIn")?;
        Ok(counts)
    }

    fn to_eng_units(&mut self, range: AnalogRange, counts: u16) -> Result<f32, DaqError> {
        let mut volts: c_float = 0.0;
        let code = unsafe {
            (self.api.to_eng_units)(
                self.board_num,
                range.code(),
                counts,
                &mut volts as *mut c_float,
            )
        };
        self.api.check(code, "cbToEngUnits")?;
        Ok(volts)
    }
}
