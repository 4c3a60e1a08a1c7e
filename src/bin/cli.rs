// Classroom signaling CLI
// Queries the relay over HTTP and joins rooms as a teacher or student with real peer connections

use std::sync::Arc;

use clap::{Parser, Subcommand};
use classroom_signaling::client::{run_student, run_teacher, ClassroomEvent, SignalingClient};
use classroom_signaling::config::{BrowserIceServer, IceConfig};
use classroom_signaling::negotiation::webrtc_transport::create_webrtc_api;
use classroom_signaling::negotiation::WebRtcTransportFactory;
use classroom_signaling::signaling::{ClientMessage, PeerRole, ServerMessage};
use classroom_signaling::SignalingError;
use colored::*;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[derive(Parser)]
#[command(name = "classroom-cli")]
#[command(about = "Classroom signaling server CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:3000)
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Show the ICE servers the relay hands out
    Config,

    /// Show server status and room count
    Status,

    /// Create a new room
    CreateRoom,

    /// Check whether a room exists
    CheckRoom {
        /// 6-digit room code
        code: String,
    },

    /// List every room
    ActiveRooms,

    /// Join as the teacher and stream to every student in the room
    Teach {
        /// Room code (a new room is created when omitted)
        #[arg(short, long)]
        room: Option<String>,

        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Join as a student and watch the teacher's stream
    Watch {
        /// Room code to join
        #[arg(short, long)]
        room: String,

        /// Leave after this many seconds (default: until Ctrl+C)
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation scenarios
        #[arg(short, long)]
        all: bool,

        /// Run a specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Config => check_config(&cli.server).await,
        Commands::Status => check_status(&cli.server).await,
        Commands::CreateRoom => {
            create_room(&cli.server).await;
        }
        Commands::CheckRoom { code } => check_room(&cli.server, code).await,
        Commands::ActiveRooms => active_rooms(&cli.server).await,
        Commands::Teach { room, duration } => teach(&cli.server, room.clone(), *duration).await,
        Commands::Watch { room, duration } => watch(&cli.server, room, *duration).await,
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

fn ws_url(server: &str) -> String {
    format!("ws://{}/signaling", server)
}

async fn get_json(server: &str, path: &str) -> Result<serde_json::Value, String> {
    let url = format!("http://{}{}", server, path);
    let resp = reqwest::get(&url).await.map_err(|e| format!("Cannot connect to server: {}", e))?;

    if !resp.status().is_success() {
        return Err(format!("Request failed: {}", resp.status()));
    }
    resp.json::<serde_json::Value>()
        .await
        .map_err(|e| format!("Unreadable response: {}", e))
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    match get_json(server, "/health").await {
        Ok(body) => {
            println!("{} Health check passed", "✓".green());
            println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
            println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching ICE configuration...".cyan());

    match get_json(server, "/config").await {
        Ok(body) => {
            println!("{} Config endpoint accessible", "✓".green());
            println!("\n{}", pretty(&body));
        }
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

async fn check_status(server: &str) {
    match get_json(server, "/").await {
        Ok(body) => {
            println!("{} Server {}", "✓".green(), body["status"].as_str().unwrap_or("unknown"));
            println!("  Active rooms: {}", body["activeRooms"]);
        }
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

async fn create_room(server: &str) -> Option<String> {
    println!("{}", "Creating room...".cyan());

    let url = format!("http://{}/create-room", server);
    let client = reqwest::Client::new();

    let body = match client.post(&url).send().await {
        Ok(resp) if resp.status().is_success() => resp.json::<serde_json::Value>().await.ok(),
        Ok(resp) => {
            println!("{} Room creation failed: {}", "✗".red(), resp.status());
            return None;
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return None;
        }
    };

    let code = body.as_ref().and_then(|b| b["roomCode"].as_str()).map(str::to_string);
    match &code {
        Some(code) => {
            println!("{} Room created successfully!", "✓".green());
            println!("\n{}", "═".repeat(50).green());
            println!("{} {}", "Room code:".bold(), code.green().bold());
            println!("{}", "═".repeat(50).green());
        }
        None => println!("{} Unexpected response from server", "✗".red()),
    }
    code
}

async fn check_room(server: &str, code: &str) {
    match get_json(server, &format!("/room/{}", code)).await {
        Ok(body) if body["exists"] == true => {
            println!("{} Room {} exists", "✓".green(), code.bold());
            println!("  Streaming: {}", body["isActive"]);
            println!("  Students: {}", body["studentCount"]);
        }
        Ok(_) => println!("{} Room {} not found", "✗".yellow(), code),
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

async fn active_rooms(server: &str) {
    match get_json(server, "/active-rooms").await {
        Ok(body) => {
            let rooms = body.as_array().cloned().unwrap_or_default();
            println!("{} {} room(s)", "✓".green(), rooms.len());
            for room in rooms {
                let live = if room["isActive"] == true {
                    "live".green()
                } else {
                    "idle".dimmed()
                };
                println!(
                    "  {} [{}] students: {}",
                    room["code"].as_str().unwrap_or("?").bold(),
                    live,
                    room["studentCount"]
                );
            }
        }
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

async fn shutdown_signal(duration: Option<u64>) {
    match duration {
        Some(secs) => {
            tokio::select! {
                _ = sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn print_events(mut events: mpsc::UnboundedReceiver<ClassroomEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClassroomEvent::Joined(joined) => {
                    println!("{} Joined room {} as {}", "✓".green(), joined.room_code.bold(), joined.role);
                    if !joined.student_ids.is_empty() {
                        println!("  Students present: {}", joined.student_ids.len());
                    }
                }
                ClassroomEvent::StudentJoined(id) => println!("{} Student joined: {}", "◀".green(), id),
                ClassroomEvent::StudentLeft(id) => println!("{} Student left: {}", "◀".yellow(), id),
                ClassroomEvent::StreamStarted => println!("{} Teacher started streaming", "◀".green()),
                ClassroomEvent::StreamStopped => println!("{} Teacher stopped streaming", "◀".yellow()),
                ClassroomEvent::TeacherDisconnected => println!("{} Teacher disconnected", "✗".yellow()),
                ClassroomEvent::Connection(status) => {
                    println!("{} Media link with {}: {}", "●".cyan(), status.remote_id, status.state);
                }
                ClassroomEvent::ServerError(message) => println!("{} Server error: {}", "✗".red(), message),
            }
        }
    })
}

fn video_track() -> Arc<dyn TrackLocal + Send + Sync> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            ..Default::default()
        },
        "video".to_owned(),
        "classroom".to_owned(),
    ))
}

async fn fetch_ice_config(server: &str) -> IceConfig {
    // the relay's own ICE settings win over local defaults
    let Ok(mut body) = get_json(server, "/config").await else {
        return IceConfig::default();
    };
    let served = body.get_mut("iceServers").map(serde_json::Value::take).unwrap_or_default();
    match serde_json::from_value::<Vec<BrowserIceServer>>(served) {
        Ok(servers) if !servers.is_empty() => IceConfig::from_browser_servers(servers),
        Ok(_) => IceConfig::default(),
        Err(e) => {
            tracing::warn!(error = %e, "Relay served an unreadable ICE configuration");
            IceConfig::default()
        }
    }
}

async fn teach(server: &str, room: Option<String>, duration: Option<u64>) {
    let room = match room {
        Some(room) => room,
        None => match create_room(server).await {
            Some(room) => room,
            None => return,
        },
    };

    let api = match create_webrtc_api() {
        Ok(api) => api,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };
    let ice = fetch_ice_config(server).await;
    let factory = WebRtcTransportFactory::publisher(api, &ice, vec![video_track()]);

    let client = match SignalingClient::connect(&ws_url(server)).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = print_events(events_rx);
    println!("Streaming to room {}. Press {} to stop.", room.green().bold(), "Ctrl+C".bold());

    let result = run_teacher(client, factory, &room, events_tx, shutdown_signal(duration)).await;
    let _ = printer.await;

    match result {
        Ok(()) => println!("{} Stream stopped", "✓".green()),
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

async fn watch(server: &str, room: &str, duration: Option<u64>) {
    let api = match create_webrtc_api() {
        Ok(api) => api,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };
    let ice = fetch_ice_config(server).await;
    let factory = WebRtcTransportFactory::viewer(api, &ice);

    let client = match SignalingClient::connect(&ws_url(server)).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = print_events(events_rx);

    let result = run_student(client, factory, room, events_tx, shutdown_signal(duration)).await;
    let _ = printer.await;

    match result {
        Ok(()) => println!("{} Left room {}", "✓".green(), room),
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Basic WebSocket connection test", "connection".cyan());
    println!("  {} - Room creation over HTTP", "create-room".cyan());
    println!("  {} - Teacher and student join the same room", "join-room".cyan());
    println!("  {} - Joining an unknown room is rejected", "invalid-room".cyan());
    println!("  {} - Stream start/stop reaches students", "stream-control".cyan());
    println!("  {} - Offer relayed from teacher to student", "relay".cyan());
    println!("\nExample: classroom-cli validate --scenario join-room");
}

async fn run_all_validations(server: &str) {
    println!("{}", "Running all validation scenarios...\n".bold());

    let scenarios = ["connection", "create-room", "join-room", "invalid-room", "stream-control", "relay"];
    let mut passed = 0;

    for scenario in scenarios {
        if run_scenario(server, scenario).await {
            passed += 1;
        }
        println!();
    }

    let summary = format!("{}/{} scenarios passed", passed, scenarios.len());
    if passed == scenarios.len() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
}

async fn run_scenario(server: &str, scenario: &str) -> bool {
    println!("{} {}", "Running scenario:".bold(), scenario.cyan());

    let result = match scenario {
        "connection" => scenario_connection(server).await,
        "create-room" => scenario_create_room(server).await,
        "join-room" => scenario_join_room(server).await,
        "invalid-room" => scenario_invalid_room(server).await,
        "stream-control" => scenario_stream_control(server).await,
        "relay" => scenario_relay(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return false;
        }
    };

    match result {
        Ok(()) => {
            println!("{} {} passed", "✓".green(), scenario);
            true
        }
        Err(e) => {
            println!("{} {} failed: {}", "✗".red(), scenario, e);
            false
        }
    }
}

type ScenarioResult = Result<(), String>;

async fn new_room(server: &str) -> Result<String, String> {
    let url = format!("http://{}/create-room", server);
    let body = reqwest::Client::new()
        .post(&url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .json::<serde_json::Value>()
        .await
        .map_err(|e| e.to_string())?;

    body["roomCode"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| "response carried no roomCode".to_string())
}

async fn connect(server: &str) -> Result<SignalingClient, String> {
    SignalingClient::connect(&ws_url(server)).await.map_err(|e| e.to_string())
}

async fn expect_message(client: &mut SignalingClient) -> Result<ServerMessage, String> {
    match timeout(Duration::from_secs(5), client.recv()).await {
        Ok(Ok(Some(message))) => Ok(message),
        Ok(Ok(None)) => Err("connection closed".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("timeout waiting for message".to_string()),
    }
}

async fn scenario_connection(server: &str) -> ScenarioResult {
    let client = connect(server).await?;
    println!("  {} WebSocket connection established", "✓".green());
    client.close().await.map_err(|e| e.to_string())
}

async fn scenario_create_room(server: &str) -> ScenarioResult {
    let code = new_room(server).await?;
    println!("  {} Created room {}", "✓".green(), code);

    let status = get_json(server, &format!("/room/{}", code)).await?;
    if status["exists"] != true {
        return Err("new room is not reported as existing".to_string());
    }
    Ok(())
}

async fn scenario_join_room(server: &str) -> ScenarioResult {
    let code = new_room(server).await?;

    let mut teacher = connect(server).await?;
    teacher.join(PeerRole::Teacher, &code).await.map_err(|e| e.to_string())?;
    println!("  {} Teacher joined", "✓".green());

    let mut student = connect(server).await?;
    student.join(PeerRole::Student, &code).await.map_err(|e| e.to_string())?;
    println!("  {} Student joined", "✓".green());

    match expect_message(&mut teacher).await? {
        ServerMessage::StudentJoined { student_count: 1, .. } => {
            println!("  {} Teacher notified of the student", "✓".green());
            Ok(())
        }
        other => Err(format!("unexpected message {:?}", other)),
    }
}

async fn scenario_invalid_room(server: &str) -> ScenarioResult {
    let mut student = connect(server).await?;
    match student.join(PeerRole::Student, "000000").await {
        Err(SignalingError::Connection(message)) if message.contains("Room not found") => {
            println!("  {} Join rejected: {}", "✓".green(), message);
            Ok(())
        }
        Err(e) => Err(format!("unexpected error {}", e)),
        Ok(_) => Err("join to an unknown room succeeded".to_string()),
    }
}

async fn scenario_stream_control(server: &str) -> ScenarioResult {
    let code = new_room(server).await?;
    let mut teacher = connect(server).await?;
    teacher.join(PeerRole::Teacher, &code).await.map_err(|e| e.to_string())?;
    let mut student = connect(server).await?;
    student.join(PeerRole::Student, &code).await.map_err(|e| e.to_string())?;
    expect_message(&mut teacher).await?;

    teacher
        .send(&ClientMessage::StartStream { room_code: code.clone() })
        .await
        .map_err(|e| e.to_string())?;
    if expect_message(&mut student).await? != ServerMessage::StreamStarted {
        return Err("student did not see stream-started".to_string());
    }
    println!("  {} stream-started delivered", "✓".green());

    teacher
        .send(&ClientMessage::StopStream { room_code: code })
        .await
        .map_err(|e| e.to_string())?;
    if expect_message(&mut student).await? != ServerMessage::StreamStopped {
        return Err("student did not see stream-stopped".to_string());
    }
    println!("  {} stream-stopped delivered", "✓".green());
    Ok(())
}

async fn scenario_relay(server: &str) -> ScenarioResult {
    let code = new_room(server).await?;
    let mut teacher = connect(server).await?;
    teacher.join(PeerRole::Teacher, &code).await.map_err(|e| e.to_string())?;
    let mut student = connect(server).await?;
    student.join(PeerRole::Student, &code).await.map_err(|e| e.to_string())?;

    let student_id = match expect_message(&mut teacher).await? {
        ServerMessage::StudentJoined { student_id, .. } => student_id,
        other => return Err(format!("unexpected message {:?}", other)),
    };

    let offer = serde_json::json!({ "type": "offer", "sdp": "v=0\r\n" });
    teacher
        .send(&ClientMessage::Offer {
            room_code: Some(code),
            offer: offer.clone(),
            target_id: Some(student_id),
        })
        .await
        .map_err(|e| e.to_string())?;

    match expect_message(&mut student).await? {
        ServerMessage::Offer { offer: relayed, .. } if relayed == offer => {
            println!("  {} Offer relayed unchanged", "✓".green());
            Ok(())
        }
        other => Err(format!("unexpected message {:?}", other)),
    }
}
