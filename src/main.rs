// Copyright 2025 Pulsewatch contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tail the dashboard's real-time channels from a terminal.

use clap::Parser;
use log::info;
use pulsewatch::{
    BackoffSchedule, BoardEvent, DashboardClient, DashboardConfig, FeedEvent, RegistryConfig,
};

#[derive(Debug, Parser)]
#[command(name = "pulsewatch", about = "Tail Pulsewatch dashboard channels")]
struct Args {
    /// Base URL of the dashboard server.
    #[arg(long, default_value = "pulse://localhost:7420")]
    base_url: String,

    /// Bearer token for the channel handshake.
    #[arg(long, env = "PULSEWATCH_TOKEN")]
    token: Option<String>,

    /// Join this user's notification group after connecting.
    #[arg(long)]
    user_id: Option<String>,

    /// Reconnect delays in milliseconds.
    #[arg(long, value_delimiter = ',', default_values_t = [0_u64, 2000, 10_000, 30_000])]
    backoff_ms: Vec<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let client = DashboardClient::new(DashboardConfig {
        registry: RegistryConfig {
            base_url: args.base_url.clone(),
            access_token: args.token,
            backoff: BackoffSchedule::new(args.backoff_ms),
            ..Default::default()
        },
        ..Default::default()
    });

    let mut feed_events = client.feed_events();
    let mut board_events = client.board_events();

    client.connect().await?;
    info!("Connected to {}", args.base_url);

    if let Some(user_id) = args.user_id {
        client.join_user_group(&user_id).await?;
        let unread = client.refresh_unread_count().await?;
        println!("{unread} unread notifications");
    }

    loop {
        tokio::select! {
            event = feed_events.recv() => match event {
                Ok(FeedEvent::NotificationAdded(id)) => {
                    if let Some(n) = client.notifications().iter().find(|n| n.id == id) {
                        println!("[{}] {}: {}", n.kind, n.title, n.message);
                    }
                }
                Ok(FeedEvent::UnreadCountChanged(count)) => {
                    println!("{count} unread");
                }
                Ok(FeedEvent::AnnouncementAdded(id)) => {
                    if let Some(a) = client.announcements().iter().find(|a| a.id == id) {
                        println!("[announcement] {}: {}", a.title, a.message);
                    }
                }
                Ok(FeedEvent::AlertAdded(id)) => {
                    if let Some(alert) = client.alerts().iter().find(|a| a.id == id) {
                        println!("[alert {:?}] {}", alert.severity, alert.message);
                    }
                }
                Ok(FeedEvent::NotificationRead(id)) => {
                    println!("read: {id}");
                }
                Err(_) => break,
            },
            event = board_events.recv() => match event {
                Ok(BoardEvent::EndpointChanged(id)) => {
                    if let Some(ep) = client.endpoint(&id) {
                        println!(
                            "endpoint {}: {:?} ({} ms)",
                            id,
                            ep.status,
                            ep.response_time_ms.unwrap_or_default()
                        );
                    }
                }
                Ok(BoardEvent::EndpointDown(id)) => println!("endpoint {id} DOWN"),
                Ok(BoardEvent::EndpointRecovered(id)) => println!("endpoint {id} recovered"),
                Ok(BoardEvent::MetricsUpdated) => {
                    if let Some(m) = client.last_metrics() {
                        println!("fleet: {}/{} up", m.endpoints_up, m.total_endpoints);
                    }
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                client.shutdown();
                break;
            }
        }
    }

    Ok(())
}
