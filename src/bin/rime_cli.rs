use std::{
    error::Error,
    io,
    net::SocketAddr,
};

use clap::Parser;
use rime::{
    cli::{Line, prompt},
    client::{Client, ClientError},
    protocol::Response,
    storage::record::Record,
};

#[derive(Parser)]
#[command(version, about = "Interactive Rime client", long_about = None)]
struct Cli {
    /// Server address
    #[arg(default_value = rime::config::DEFAULT_ADDRESS)]
    address: SocketAddr,
    /// Log in as this user after connecting
    #[arg(long)]
    user: Option<String>,
    /// Password for --user
    #[arg(long, default_value = "")]
    password: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut client = Client::connect(cli.address)?;
    println!("{}", client.banner());

    if let Some(user) = &cli.user {
        login(&mut client, user, &cli.password)?;
    }

    let stdio = io::stdin();
    let stdout = io::stdout();
    loop {
        let reader = stdio.lock();
        let writer = StdOut {
            inner: stdout.lock(),
        };

        let line = match prompt(reader, writer) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match line {
            Line::Exit => break,
            Line::Login { user, password } => login(&mut client, &user, &password)?,
            Line::Request(request) => match client.execute(&request) {
                Ok(response) => print(&response),
                Err(e) => {
                    eprintln!("connection error: {e}");
                    break;
                }
            },
        }
    }

    Ok(())
}

fn login(client: &mut Client, user: &str, password: &str) -> Result<(), ClientError> {
    if client.auth_password(user, password)? {
        println!("logged in as {user}");
    } else {
        eprintln!("login failed");
    }
    Ok(())
}

fn print(response: &Response) {
    match response {
        Response::Err(message) => eprintln!("error: {message}"),
        Response::Row(Some(row)) => {
            if let Some(header) = &row.header {
                println!("{}", header.join(" | "));
            }
            match Record::unpack(&row.record) {
                Ok(record) => println!("@{} {record}", row.address),
                Err(_) => println!("{response}"),
            }
        }
        response => println!("{response}"),
    }
}

/// StdOut wrapper than automatically flushes content after every write.
struct StdOut<W: io::Write> {
    inner: W,
}

impl<W: io::Write> io::Write for StdOut<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let res = self.inner.write(buf);
        if res.is_ok() {
            self.inner.flush()?
        }
        res
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
