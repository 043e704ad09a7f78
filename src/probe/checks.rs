/// Concrete host checks backing the standard probe catalog
///
/// Each check is split into a thin platform query and a pure interpreter of
/// its output; the interpreters are what the unit tests exercise.
use crate::config::types::ProbeError;
use crate::probe::tool::run_tool;
use std::path::Path;
use std::time::{Duration, Instant};

/// OUI prefixes assigned to VMware, VirtualBox, Parallels and Xen NICs
pub const VM_MAC_PREFIXES: &[&str] = &[
    "00:05:69", "00:0c:29", "00:50:56", "00:1c:14", "00:03:ff", "00:05:00",
];

/// Hardware model substrings reported by hypervisors
pub const VM_MODEL_MARKERS: &[&str] = &["Virtual", "VMware", "VirtualBox", "Hyper-V", "QEMU"];

/// Analysis and VM-guest tooling that should not run during an exam
pub const SUSPICIOUS_PROCESSES: &[&str] = &[
    "vmtoolsd",
    "vboxservice",
    "wireshark",
    "fiddler",
    "sandboxie",
    "processhacker",
];

const DEBUGGER_PROCESSES: &[&str] = &["gdb", "lldb"];

pub const VM_ARTIFACTS_MACOS: &[&str] = &["/Applications/VMware Tools", "/Applications/VirtualBox.app"];
pub const VM_ARTIFACTS_WINDOWS: &[&str] = &[
    r"C:\Program Files\VMware\VMware Tools",
    r"C:\Program Files\Oracle\VirtualBox Guest Additions",
];

pub const VIRTUALBOX_DRIVERS: &[&str] = &[
    "VBoxGuest.sys",
    "VBoxMouse.sys",
    "VBoxSF.sys",
    "VBoxVideo.sys",
    "VBoxNetLwf.sys",
    "VBoxNetAdp.sys",
    "VBoxDrv.sys",
    "VBoxUSBMon.sys",
    "VBoxUSB.sys",
    "VBoxWddm.sys",
    "VBoxMRXNP.sys",
    "VBoxCdd.sys",
    "VBoxEhciR0.sys",
];
const WINDOWS_DRIVER_DIR: &str = r"C:\Windows\System32\drivers";

const SANDBOX_APP_MACOS: &str = "/Applications/WindowsSandbox.app";
const WINDOWS_APPS_DIR: &str = r"C:\Program Files\WindowsApps";
const WINDOWS_SANDBOX_PREFIX: &str = "Microsoft.WindowsSandbox_";

// ---------------------------------------------------------------------------
// Output interpreters
// ---------------------------------------------------------------------------

/// `systemd-detect-virt` prints the technology and exits 0 inside a VM,
/// prints "none" and exits 1 on bare metal.
pub fn interpret_detect_virt(code: Option<i32>, stdout: &str) -> Result<bool, ProbeError> {
    let answer = stdout.trim();
    match code {
        Some(0) => Ok(!answer.is_empty() && answer != "none"),
        Some(1) if answer == "none" || answer.is_empty() => Ok(false),
        other => Err(ProbeError::execution(
            "systemd-detect-virt",
            format!("unexpected exit {:?} with output {:?}", other, answer),
        )),
    }
}

pub fn model_indicates_vm(model: &str) -> bool {
    VM_MODEL_MARKERS.iter().any(|marker| model.contains(marker))
}

/// Scan free-form tool output for a MAC address whose OUI belongs to a VM
/// vendor. Accepts `:` or `-` separators in either case; only the first
/// three octets of each address are compared.
pub fn contains_vm_mac(text: &str) -> bool {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == '"')
        .map(|token| token.to_ascii_lowercase().replace('-', ":"))
        .filter(|token| is_mac_address(token))
        .any(|mac| VM_MAC_PREFIXES.iter().any(|prefix| mac.starts_with(prefix)))
}

fn is_mac_address(token: &str) -> bool {
    let octets: Vec<&str> = token.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

pub fn cpuinfo_has_hypervisor(cpuinfo: &str) -> bool {
    cpuinfo
        .lines()
        .filter(|line| line.starts_with("flags"))
        .any(|line| line.split_whitespace().any(|flag| flag == "hypervisor"))
}

/// Value of a `name: value` sysctl line
pub fn sysctl_value(output: &str) -> &str {
    output
        .split_once(':')
        .map(|(_, value)| value)
        .unwrap_or(output)
        .trim()
}

/// TracerPid from /proc/<pid>/status; zero means not traced
pub fn tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}

/// Reduce a process listing entry to a bare lowercase executable name.
pub fn normalize_process_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('"');
    let base = trimmed
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    base.strip_suffix(".exe").map(str::to_string).unwrap_or(base)
}

pub fn is_suspicious_process(raw: &str) -> bool {
    let name = normalize_process_name(raw);
    SUSPICIOUS_PROCESSES.contains(&name.as_str())
}

pub fn is_debugger_process(raw: &str) -> bool {
    let name = normalize_process_name(raw);
    DEBUGGER_PROCESSES.contains(&name.as_str())
}

/// True when any listed path exists; unreadable locations count as absent.
pub fn any_path_exists<P: AsRef<Path>>(paths: &[P]) -> bool {
    paths.iter().any(|p| p.as_ref().exists())
}

/// Directory listing; a missing directory is `None` (not applicable here).
fn read_dir_if_present(dir: &Path) -> Result<Option<std::fs::ReadDir>, ProbeError> {
    match std::fs::read_dir(dir) {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// True when `dir` holds an entry whose name starts with `prefix`.
pub fn dir_has_entry_with_prefix(dir: &Path, prefix: &str) -> Result<bool, ProbeError> {
    let Some(entries) = read_dir_if_present(dir)? else {
        return Ok(false);
    };
    Ok(entries
        .flatten()
        .any(|entry| entry.file_name().to_string_lossy().starts_with(prefix)))
}

/// VM vendor MAC on any interface of a sysfs-style `class/net` directory
pub fn net_dir_has_vm_mac(net_dir: &Path) -> Result<bool, ProbeError> {
    let Some(entries) = read_dir_if_present(net_dir)? else {
        return Ok(false);
    };
    let mut addresses = String::new();
    for entry in entries.flatten() {
        if let Ok(address) = std::fs::read_to_string(entry.path().join("address")) {
            addresses.push_str(&address);
            addresses.push('\n');
        }
    }
    Ok(contains_vm_mac(&addresses))
}

/// Suspicious process among the numeric entries of a procfs-style directory.
/// Processes that exit mid-scan or are unreadable are skipped.
pub fn proc_dir_has_suspicious_process(proc_dir: &Path) -> Result<bool, ProbeError> {
    let Some(entries) = read_dir_if_present(proc_dir)? else {
        return Ok(false);
    };
    Ok(entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .chars()
                .all(|c| c.is_ascii_digit())
        })
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("comm")).ok())
        .any(|comm| is_suspicious_process(&comm)))
}

// ---------------------------------------------------------------------------
// Host queries
// ---------------------------------------------------------------------------

pub fn vm_hardware(timeout: Duration) -> Result<bool, ProbeError> {
    if cfg!(target_os = "linux") {
        let output = run_tool("systemd-detect-virt", &[], timeout)?;
        interpret_detect_virt(output.code(), &output.stdout)
    } else if cfg!(target_os = "macos") {
        let output = run_tool("sysctl", &["hw.model"], timeout)?.require_success("sysctl")?;
        Ok(output.stdout.contains("VMware") || output.stdout.contains("VirtualBox"))
    } else if cfg!(target_os = "windows") {
        let output = run_tool("wmic", &["computersystem", "get", "model"], timeout)?
            .require_success("wmic")?;
        Ok(model_indicates_vm(&output.stdout))
    } else {
        Ok(false)
    }
}

pub fn vm_mac(timeout: Duration) -> Result<bool, ProbeError> {
    if cfg!(target_os = "linux") {
        net_dir_has_vm_mac(Path::new("/sys/class/net"))
    } else {
        let tool = if cfg!(target_os = "windows") {
            "getmac"
        } else {
            "ifconfig"
        };
        let output = run_tool(tool, &[], timeout)?.require_success(tool)?;
        Ok(contains_vm_mac(&output.stdout))
    }
}

pub fn vm_artifacts() -> Result<bool, ProbeError> {
    if cfg!(target_os = "macos") {
        Ok(any_path_exists(VM_ARTIFACTS_MACOS))
    } else if cfg!(target_os = "windows") {
        Ok(any_path_exists(VM_ARTIFACTS_WINDOWS))
    } else {
        Ok(false)
    }
}

pub fn virtualbox_drivers() -> Result<bool, ProbeError> {
    let dir = Path::new(WINDOWS_DRIVER_DIR);
    let paths: Vec<_> = VIRTUALBOX_DRIVERS.iter().map(|d| dir.join(d)).collect();
    Ok(any_path_exists(&paths))
}

pub fn cpu_features(timeout: Duration) -> Result<bool, ProbeError> {
    if cfg!(target_os = "linux") {
        match std::fs::read_to_string("/proc/cpuinfo") {
            Ok(cpuinfo) => Ok(cpuinfo_has_hypervisor(&cpuinfo)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    } else if cfg!(target_os = "macos") {
        let output = run_tool("sysctl", &["machdep.cpu.features"], timeout)?
            .require_success("sysctl")?;
        Ok(sysctl_value(&output.stdout)
            .split_whitespace()
            .any(|feature| feature == "VMM"))
    } else {
        Ok(false)
    }
}

pub fn hypervisor(timeout: Duration) -> Result<bool, ProbeError> {
    if cfg!(target_os = "macos") {
        let output =
            run_tool("sysctl", &["kern.hv_support"], timeout)?.require_success("sysctl")?;
        Ok(sysctl_value(&output.stdout) == "1")
    } else if cfg!(target_os = "windows") {
        Ok(cpuid_hypervisor_bit())
    } else {
        Ok(false)
    }
}

#[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
fn cpuid_hypervisor_bit() -> bool {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::__cpuid;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::__cpuid;

    // SAFETY: CPUID leaf 1 is available on every x86 CPU that runs Rust binaries
    let leaf = unsafe { __cpuid(1) };
    leaf.ecx & (1 << 31) != 0
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
fn cpuid_hypervisor_bit() -> bool {
    false
}

pub fn sandbox_files() -> Result<bool, ProbeError> {
    if cfg!(target_os = "macos") {
        Ok(Path::new(SANDBOX_APP_MACOS).exists())
    } else if cfg!(target_os = "windows") {
        dir_has_entry_with_prefix(Path::new(WINDOWS_APPS_DIR), WINDOWS_SANDBOX_PREFIX)
    } else {
        Ok(false)
    }
}

#[cfg(windows)]
pub fn debugger_present(_timeout: Duration) -> Result<bool, ProbeError> {
    Ok(windows_debugger_present())
}

#[cfg(unix)]
pub fn debugger_present(timeout: Duration) -> Result<bool, ProbeError> {
    if cfg!(target_os = "linux") {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            if tracer_pid(&status).unwrap_or(0) != 0 {
                return Ok(true);
            }
        }
    }
    Ok(parent_process_name(timeout)?
        .map(|name| is_debugger_process(&name))
        .unwrap_or(false))
}

#[cfg(not(any(unix, windows)))]
pub fn debugger_present(_timeout: Duration) -> Result<bool, ProbeError> {
    Ok(false)
}

#[cfg(unix)]
fn parent_process_name(timeout: Duration) -> Result<Option<String>, ProbeError> {
    let ppid = nix::unistd::getppid().as_raw();
    if cfg!(target_os = "linux") {
        match std::fs::read_to_string(format!("/proc/{}/comm", ppid)) {
            Ok(comm) => Ok(Some(comm.trim().to_string())),
            Err(_) => Ok(None),
        }
    } else {
        let pid = ppid.to_string();
        let output = run_tool("ps", &["-o", "comm=", "-p", &pid], timeout)?;
        // ps exits 1 when the parent is already gone
        Ok(output
            .success()
            .then(|| output.stdout.trim().to_string())
            .filter(|name| !name.is_empty()))
    }
}

#[cfg(windows)]
fn windows_debugger_present() -> bool {
    #[link(name = "kernel32")]
    extern "system" {
        fn IsDebuggerPresent() -> i32;
    }
    // SAFETY: no arguments, reads the current process's PEB flag
    unsafe { IsDebuggerPresent() != 0 }
}

/// Times an empty loop; single-stepping or heavy instrumentation slows it
/// far past what bare hardware needs.
pub fn timing_anomaly(iterations: u64, threshold: Duration) -> bool {
    let started = Instant::now();
    for i in 0..iterations {
        std::hint::black_box(i);
    }
    started.elapsed() > threshold
}

pub fn suspicious_processes(timeout: Duration) -> Result<bool, ProbeError> {
    if cfg!(target_os = "linux") {
        proc_dir_has_suspicious_process(Path::new("/proc"))
    } else if cfg!(target_os = "windows") {
        let output = run_tool("tasklist", &["/fo", "csv", "/nh"], timeout)?
            .require_success("tasklist")?;
        Ok(output
            .stdout
            .lines()
            .filter_map(|line| line.split(',').next())
            .any(is_suspicious_process))
    } else {
        let output =
            run_tool("ps", &["-axo", "comm="], timeout)?.require_success("ps")?;
        Ok(output.stdout.lines().any(is_suspicious_process))
    }
}
