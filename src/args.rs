use argh::FromArgs;
use std::path::PathBuf;

#[derive(FromArgs, Debug)]
/// Bluetooth heart rate monitor data logger
pub struct TopLevelCmd {
    /// mac address of the BLE device (default: auto-discovery)
    #[argh(option, short = 'm')]
    pub address: Option<String>,
    /// check the battery level on connect
    #[argh(switch, short = 'b')]
    pub check_battery: bool,
    /// gatttool path (default: the one on PATH)
    #[argh(option, short = 'g')]
    pub gatttool: Option<PathBuf>,
    /// output SQLite database (default: none, readings are only logged)
    #[argh(option, short = 'o')]
    pub output: Option<PathBuf>,
    /// gatttool handle used for HR notifications (default: discovered)
    #[argh(option, short = 'H')]
    pub hr_handle: Option<String>,
    /// verbose output
    #[argh(switch, short = 'v')]
    pub verbose: bool,
    /// log every line exchanged with gatttool
    #[argh(switch, short = 'd')]
    pub debug_gatttool: bool,
    /// specify config file path, must exist
    #[argh(option, short = 'c')]
    pub config_override: Option<PathBuf>,
}
