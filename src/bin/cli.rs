use std::{fs, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use reqwest::{header, multipart, Client, RequestBuilder};
use serde_json::json;

const TOKEN_FILE: &str = ".house_token";

#[derive(Parser)]
#[command(name = "house-cli")]
#[command(about = "CLI for the house_app booking API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:4000")]
    url: String,
}

#[derive(Args)]
struct PlaceArgs {
    #[arg(short, long)]
    title: String,
    #[arg(short, long, default_value = "")]
    address: String,
    #[arg(short, long, default_value = "")]
    description: String,
    /// Stored photo names (from `upload` / `upload-link`)
    #[arg(long = "photo")]
    photos: Vec<String>,
    #[arg(long = "perk")]
    perks: Vec<String>,
    #[arg(long, default_value = "")]
    extra_info: String,
    #[arg(long, default_value = "14")]
    check_in: String,
    #[arg(long, default_value = "11")]
    check_out: String,
    #[arg(short = 'g', long)]
    max_guests: u32,
    #[arg(short, long)]
    price: f64,
}

impl PlaceArgs {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "title": self.title,
            "address": self.address,
            "addedPhotos": self.photos,
            "description": self.description,
            "perks": self.perks,
            "extraInfo": self.extra_info,
            "checkIn": self.check_in,
            "checkOut": self.check_out,
            "maxGuests": self.max_guests,
            "price": self.price,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Profile,
    Logout,
    UploadLink {
        #[arg(short, long)]
        link: String,
    },
    Upload {
        files: Vec<PathBuf>,
    },
    CreatePlace(PlaceArgs),
    UpdatePlace {
        #[arg(short, long)]
        id: String,
        #[command(flatten)]
        place: PlaceArgs,
    },
    MyPlaces,
    Place {
        id: String,
    },
    Places,
    Book {
        #[arg(long)]
        place: String,
        /// YYYY-MM-DD
        #[arg(long)]
        check_in: String,
        /// YYYY-MM-DD
        #[arg(long)]
        check_out: String,
        #[arg(short = 'g', long, default_value_t = 1)]
        guests: u32,
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(short, long)]
        price: f64,
    },
    Bookings,
}

/// Attach the saved session cookie, if any.
fn with_session(req: RequestBuilder) -> RequestBuilder {
    match fs::read_to_string(TOKEN_FILE) {
        Ok(token) if !token.trim().is_empty() => {
            req.header(header::COOKIE, format!("token={}", token.trim()))
        }
        _ => req,
    }
}

/// Pull the `token` value out of a login response's Set-Cookie headers.
fn session_from(res: &reqwest::Response) -> Option<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.trim().strip_prefix("token="))
        .map(str::to_string)
        .find(|t| !t.is_empty())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    println!("{status}: {}", res.text().await?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let url = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Register { name, email, password } => {
            let res = client.post(format!("{url}/register"))
                .json(&json!({ "name": name, "email": email, "password": password }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Login { email, password } => {
            let res = client.post(format!("{url}/login"))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                if let Some(token) = session_from(&res) {
                    fs::write(TOKEN_FILE, token)?;
                    println!("Logged in. Session saved to {TOKEN_FILE}");
                }
            }
            print_response(res).await?;
        }
        Commands::Profile => {
            let res = with_session(client.get(format!("{url}/profile"))).send().await?;
            print_response(res).await?;
        }
        Commands::Logout => {
            let res = client.post(format!("{url}/logout")).send().await?;
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (session removed).");
            print_response(res).await?;
        }
        Commands::UploadLink { link } => {
            let res = client.post(format!("{url}/upload-by-link"))
                .json(&json!({ "link": link }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Upload { files } => {
            let mut form = multipart::Form::new();
            for path in files {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload.bin".to_string());
                let part = multipart::Part::bytes(fs::read(&path)?).file_name(file_name);
                form = form.part("photos", part);
            }
            let res = client.post(format!("{url}/upload")).multipart(form).send().await?;
            print_response(res).await?;
        }
        Commands::CreatePlace(place) => {
            let res = with_session(client.post(format!("{url}/places")))
                .json(&place.to_json())
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::UpdatePlace { id, place } => {
            let mut body = place.to_json();
            body["id"] = json!(id);
            let res = with_session(client.put(format!("{url}/places")))
                .json(&body)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::MyPlaces => {
            let res = with_session(client.get(format!("{url}/user-places"))).send().await?;
            print_response(res).await?;
        }
        Commands::Place { id } => {
            let res = client.get(format!("{url}/places/{id}")).send().await?;
            print_response(res).await?;
        }
        Commands::Places => {
            let res = client.get(format!("{url}/places")).send().await?;
            print_response(res).await?;
        }
        Commands::Book { place, check_in, check_out, guests, name, phone, price } => {
            let res = with_session(client.post(format!("{url}/bookings")))
                .json(&json!({
                    "place": place,
                    "checkIn": check_in,
                    "checkOut": check_out,
                    "numberOfGuests": guests,
                    "name": name,
                    "phone": phone,
                    "price": price,
                }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Bookings => {
            let res = with_session(client.get(format!("{url}/bookings"))).send().await?;
            print_response(res).await?;
        }
    }

    Ok(())
}
