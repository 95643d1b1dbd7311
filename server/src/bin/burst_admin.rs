#![deny(warnings)]

use {
    anyhow::Result,
    burst_server::PhotoStore,
    burst_shared::GroupedPhotosResponse,
    structopt::StructOpt,
    tokio::fs,
};

#[derive(StructOpt, Debug)]
#[structopt(name = "burst-admin", about = "Photo burst grouping admin tool")]
enum Command {
    /// Print the bursts computed from a metadata file as JSON
    Groups {
        /// JSON file mapping filenames to photo metadata
        metadata_file: String,
    },

    /// Print the capture timestamp found in each of the specified image files
    DateTaken {
        /// Image files to inspect
        files: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    match Command::from_args() {
        Command::Groups { metadata_file } => {
            let photos = PhotoStore::new(metadata_file).get_all().await?;

            println!(
                "{}",
                serde_json::to_string_pretty(&GroupedPhotosResponse {
                    groups: burst_server::compute_groups(&photos),
                })?
            );
        }

        Command::DateTaken { files } => {
            for file in files {
                let data = fs::read(&file).await?;

                match burst_server::date_taken(&file, &data) {
                    Some(datetime) => println!("{}: {}", file, datetime),
                    None => println!("{}: not found", file),
                }
            }
        }
    }

    Ok(())
}
