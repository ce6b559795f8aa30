use std::{error::Error, process, sync::Arc};

use clap::Parser;
use log::info;
use rime::{
    config::ServerConfig,
    database::Database,
    protocol::Server,
    storage::{MemoryDatabase, dump},
};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = ServerConfig::parse();
    if !config.dir.is_dir() {
        return Err(format!("'{}' is not a directory", config.dir.display()).into());
    }

    let db = MemoryDatabase::with_dir(&config.dir);
    for user in &config.users {
        db.add_user(&user.name, &user.password)?;
        info!("added user {}", user.name);
    }
    for library in &config.libraries {
        if dump::path(&config.dir, library).exists() {
            db.load(library)?;
        } else {
            db.add_library(library, &[])?;
        }
        db.use_library(library)?;
        info!("using library {library}");
    }

    let server = Server::bind(&config, Arc::new(db))?;
    let registry = server.registry();
    ctrlc::set_handler(move || {
        info!("shutting down");
        registry.kill_all();
        process::exit(0);
    })?;

    server.listen()?;
    Ok(())
}
