use std::net::Ipv4Addr;

use structopt::StructOpt;

#[derive(Clone, Debug, StructOpt)]
pub enum Mode {
    /// Echo a byte pattern through a local TCP listener.
    #[structopt(name = "echo")]
    Echo(Echo),

    /// Broadcast a message from a UDP endpoint.
    #[structopt(name = "announce")]
    Announce(Announce),
}

#[derive(Clone, Debug, StructOpt)]
pub struct Echo {
    #[structopt(short = "p", long = "port", default_value = "7")]
    pub port: u16,
    /// Bytes handed to each send call.
    #[structopt(short = "l", default_value = "1460")]
    pub buffer_bytes: usize,
    /// Bytes to echo in total.
    #[structopt(short = "n", default_value = "10000")]
    pub total_bytes: usize,
    /// Let the stack copy the data.
    #[structopt(long = "copy")]
    pub copy: bool,
}

#[derive(Clone, Debug, StructOpt)]
pub struct Announce {
    #[structopt(short = "p", long = "port", default_value = "5000")]
    pub port: u16,
    #[structopt(short = "c", long = "count", default_value = "1")]
    pub count: usize,
    pub message: String,
}

#[derive(Clone, Debug, StructOpt)]
pub struct Config {
    /// Address of the station interface.
    pub station: Ipv4Addr,
    /// Address of the access point interface, if it is enabled.
    #[structopt(long = "softap")]
    pub softap: Option<Ipv4Addr>,
    #[structopt(long = "netmask", default_value = "255.255.255.0")]
    pub netmask: Ipv4Addr,
    #[structopt(long = "max-connections", default_value = "5")]
    pub max_connections: usize,

    #[structopt(subcommand)]
    pub mode: Mode,
}

impl Config {
    pub fn from_args() -> Self {
        StructOpt::from_args()
    }
}
