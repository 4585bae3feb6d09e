/*!
msctl, a command line client for memscope.

Every request is encoded into its wire record in the memory of this process and
handed to the dispatcher exactly like a request crossing the device boundary.
*/

use clap::{crate_authors, crate_version, Arg, ArgAction, ArgMatches, Command};
use log::{info, Level};

use memscope::architecture::PageTableLevel;
use memscope::connector::{create_image_engine, parse_address, ConnectorArgs};
use memscope::dispatch::protocol::{GET_MAPS, GET_MEM, SET_MEM};
use memscope::dispatch::{MapsRecord, MemoryRecord};
use memscope::error::{Error, ErrorKind, ErrorOrigin, Result};
use memscope::mem::{PhysicalMapper, PhysicalMemory};
use memscope::process::{Pid, ProcessResolver};
use memscope::types::{Address, PermissionFlags};
use memscope::{Dispatcher, DispatcherConfig, StatusMode};

use memscope_procfs::ProcessVmMemory;

fn main() -> Result<()> {
    let matches = parse_args();
    init_logger(&matches);

    let args = ConnectorArgs::parse(
        matches
            .get_one::<String>("connector-args")
            .map(String::as_str)
            .unwrap_or_default(),
    )?;

    let config = DispatcherConfig {
        status_mode: if matches.get_flag("binary") {
            StatusMode::Binary
        } else {
            StatusMode::Structured
        },
        ..DispatcherConfig::default()
    };

    if matches.get_flag("image") {
        let engine = create_image_engine(&args)?;
        run(Dispatcher::new(engine, config), &matches)
    } else {
        let engine = memscope_procfs::create_engine(&args)?;
        run(Dispatcher::new(engine, config), &matches)
    }
}

fn parse_args() -> ArgMatches {
    let pid = || Arg::new("pid").required(true).value_parser(clap::value_parser!(Pid));
    let addr = || Arg::new("addr").required(true);

    Command::new("msctl")
        .version(crate_version!())
        .author(crate_authors!())
        .arg(Arg::new("verbose").short('v').action(ArgAction::Count))
        .arg(
            Arg::new("connector-args")
                .long("connector-args")
                .short('c')
                .action(ArgAction::Set)
                .default_value(""),
        )
        .arg(
            Arg::new("image")
                .long("image")
                .action(ArgAction::SetTrue)
                .help("treat the connector arguments as a raw memory image"),
        )
        .arg(
            Arg::new("binary")
                .long("binary")
                .action(ArgAction::SetTrue)
                .help("report failures as -1 only"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("maps")
                .about("prints the first file backed mapping whose path contains <name>")
                .arg(pid())
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("read")
                .about("reads <len> bytes at <addr>")
                .arg(pid())
                .arg(addr())
                .arg(Arg::new("len").required(true)),
        )
        .subcommand(
            Command::new("write")
                .about("writes hex encoded bytes to <addr>")
                .arg(pid())
                .arg(addr())
                .arg(Arg::new("bytes").required(true)),
        )
        .subcommand(
            Command::new("poke")
                .about("writes a 32 bit integer to <addr>")
                .arg(pid())
                .arg(addr())
                .arg(
                    Arg::new("value")
                        .value_parser(clap::value_parser!(i32))
                        .default_value("10000"),
                ),
        )
        .subcommand(
            Command::new("probe")
                .about("translates <addr> and reports whether its page is resident")
                .arg(pid())
                .arg(addr()),
        )
        .subcommand(Command::new("selftest").about("round trip on the memory of msctl itself"))
        .get_matches()
}

fn init_logger(matches: &ArgMatches) {
    let level = match matches.get_count("verbose") {
        0 => Level::Error,
        1 => Level::Warn,
        2 => Level::Info,
        3 => Level::Debug,
        4 => Level::Trace,
        _ => Level::Trace,
    };

    // a logger that is already set is not worth aborting for
    let _ = simplelog::TermLogger::init(
        level.to_level_filter(),
        simplelog::Config::default(),
        simplelog::TerminalMode::Stdout,
        simplelog::ColorChoice::Auto,
    );
}

fn run<R, M>(mut dispatcher: Dispatcher<R, M>, matches: &ArgMatches) -> Result<()>
where
    R: ProcessResolver,
    M: PhysicalMemory + PhysicalMapper,
{
    let mut caller = ProcessVmMemory::current();
    let check: fn(i32) -> Result<()> = match dispatcher.config().status_mode {
        StatusMode::Binary => check_binary,
        StatusMode::Structured => check_structured,
    };

    match matches.subcommand() {
        Some(("maps", sub)) => {
            let mut record = MapsRecord::new(pid_arg(sub)?, string_arg(sub, "name")?);
            check(dispatcher.ioctl(&mut caller, GET_MAPS, address_of_mut(&mut record)))?;

            // start, end and flags were written by process_vm_writev
            let record = std::hint::black_box(&mut record);
            let flags = record.permissions();
            println!(
                "s:{:x} e:{:x} r:{} w:{} x:{}",
                record.start,
                record.end,
                flags.contains(PermissionFlags::READ) as u8,
                flags.contains(PermissionFlags::WRITE) as u8,
                flags.contains(PermissionFlags::EXEC) as u8,
            );
        }
        Some(("read", sub)) => {
            let addr = address_arg(sub, "addr")?;
            let len = read_len(string_arg(sub, "len")?, dispatcher.config().max_access_len)?;

            let mut buf = vec![0u8; len];
            let record = MemoryRecord::new(pid_arg(sub)?, addr, len, address_of_slice_mut(&mut buf));
            check(dispatcher.ioctl(&mut caller, GET_MEM, address_of(&record)))?;

            // filled behind the compiler's back by process_vm_writev
            hex_dump(addr, std::hint::black_box(&buf));
        }
        Some(("write", sub)) => {
            let addr = address_arg(sub, "addr")?;
            let data = parse_hex_bytes(string_arg(sub, "bytes")?)?;

            let record = MemoryRecord::new(pid_arg(sub)?, addr, data.len(), address_of_slice(&data));
            check(dispatcher.ioctl(&mut caller, SET_MEM, address_of(&record)))?;
            println!("wrote {} bytes to {:x}", data.len(), addr);
        }
        Some(("poke", sub)) => {
            let addr = address_arg(sub, "addr")?;
            let value = *sub.get_one::<i32>("value").unwrap_or(&10000);
            let data = value.to_le_bytes();

            println!("Writing number: {}...", value);
            let record = MemoryRecord::new(pid_arg(sub)?, addr, data.len(), address_of_slice(&data));
            check(dispatcher.ioctl(&mut caller, SET_MEM, address_of(&record)))?;
        }
        Some(("probe", sub)) => {
            let addr = address_arg(sub, "addr")?;
            match dispatcher.engine_mut().translate(pid_arg(sub)?, addr) {
                Ok(translation) => println!(
                    "{:x} -> {:x} (page size {:#x}, resident)",
                    translation.virt,
                    translation.phys.address(),
                    translation.phys.page_size()
                ),
                Err(Error(_, ErrorKind::TranslationFailed(level))) => {
                    println!("{:x} not resident: no entry at {} level", addr, level);
                    if level == PageTableLevel::Top {
                        println!("{:x} is not mapped", addr);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Some(("selftest", _)) => selftest(&mut dispatcher, &mut caller, check)?,
        _ => {
            return Err(Error(ErrorOrigin::Args, ErrorKind::InvalidArgument)
                .log_error("unknown subcommand"))
        }
    }

    Ok(())
}

/// Reads two bytes of this process, writes `[0, 200]` over them and reads them back.
fn selftest<R, M>(
    dispatcher: &mut Dispatcher<R, M>,
    caller: &mut ProcessVmMemory,
    check: fn(i32) -> Result<()>,
) -> Result<()>
where
    R: ProcessResolver,
    M: PhysicalMemory + PhysicalMapper,
{
    let pid = std::process::id() as Pid;
    let mut numbers = std::hint::black_box([1u8, 2]);
    let target = Address::from(numbers.as_mut_ptr() as u64);

    let mut buf = [0u8; 2];
    let record = MemoryRecord::new(pid, target, buf.len(), address_of_slice_mut(&mut buf));
    println!("R buffer before: {} {}", buf[0], buf[1]);
    check(dispatcher.ioctl(caller, GET_MEM, address_of(&record)))?;
    let buf = std::hint::black_box(buf);
    println!("R buffer after: {} {}", buf[0], buf[1]);

    let data = [0u8, 200];
    let record = MemoryRecord::new(pid, target, data.len(), address_of_slice(&data));
    println!("W numbers before: {} {}", numbers[0], numbers[1]);
    println!("W writing numbers: {} {} ...", data[0], data[1]);
    check(dispatcher.ioctl(caller, SET_MEM, address_of(&record)))?;
    let numbers = std::hint::black_box(numbers);
    println!("W numbers after: {} {}", numbers[0], numbers[1]);

    if buf != [1, 2] || numbers != data {
        return Err(Error(ErrorOrigin::Other, ErrorKind::Unknown).log_error("self test failed"));
    }

    info!("self test passed");
    Ok(())
}

fn check_structured(status: i32) -> Result<()> {
    match Error::from_status(status) {
        None => Ok(()),
        Some(kind) => Err(Error(ErrorOrigin::Dispatcher, kind)
            .log_error(format_args!("request failed with status {}", status))),
    }
}

/// Binary mode collapses every failure into -1, which carries no kind.
fn check_binary(status: i32) -> Result<()> {
    if status < 0 {
        return Err(Error(ErrorOrigin::Dispatcher, ErrorKind::Unknown).log_error("request failed"));
    }
    Ok(())
}

fn address_of<T>(record: &T) -> Address {
    Address::from(record as *const T as u64)
}

fn address_of_slice(buf: &[u8]) -> Address {
    Address::from(buf.as_ptr() as u64)
}

fn address_of_mut<T>(record: &mut T) -> Address {
    Address::from(record as *mut T as u64)
}

fn address_of_slice_mut(buf: &mut [u8]) -> Address {
    Address::from(buf.as_mut_ptr() as u64)
}

fn string_arg<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| {
            Error(ErrorOrigin::Args, ErrorKind::Configuration)
                .log_error(format_args!("missing argument {}", name))
        })
}

fn pid_arg(matches: &ArgMatches) -> Result<Pid> {
    matches.get_one::<Pid>("pid").copied().ok_or_else(|| {
        Error(ErrorOrigin::Args, ErrorKind::Configuration).log_error("missing pid")
    })
}

fn address_arg(matches: &ArgMatches, name: &str) -> Result<Address> {
    parse_address(string_arg(matches, name)?)
}

/// Parses the length of a read, which has to fit the dispatcher limit before anything is allocated.
fn read_len(value: &str, max_access_len: usize) -> Result<usize> {
    let len = parse_address(value)?.as_u64();
    if len == 0 || len > max_access_len as u64 {
        return Err(Error(ErrorOrigin::Args, ErrorKind::InvalidArgument)
            .log_error(format_args!("length {:#x} not in 1..={:#x}", len, max_access_len)));
    }
    Ok(len as usize)
}

/// Parses a string of hex digit pairs, whitespace is ignored.
fn parse_hex_bytes(value: &str) -> Result<Vec<u8>> {
    let digits = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);

    if digits.is_empty() || digits.len() % 2 != 0 || !digits.is_ascii() {
        return Err(Error(ErrorOrigin::Args, ErrorKind::InvalidArgument)
            .log_error(format_args!("invalid hex bytes {:?}", value)));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| {
                Error(ErrorOrigin::Args, ErrorKind::InvalidArgument)
                    .log_error(format_args!("invalid hex bytes {:?}", value))
            })
        })
        .collect()
}

fn hex_dump(base: Address, data: &[u8]) {
    for (i, line) in data.chunks(16).enumerate() {
        let hex = line
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ");
        let ascii = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect::<String>();
        println!("{:x}: {:<47} {}", base + i * 16, hex, ascii);
    }
}
