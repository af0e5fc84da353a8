use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use shared::{
    AppointmentDetails, BlockCheckRequest, InviteUserRequest, Lead, LeadPatch, MeetingDetails,
    NewAppointment, NewLead, RegisterRequest, ScheduleBlock,
};
use std::sync::Arc;
use tokio_stream::{wrappers::WatchStream, StreamExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod api;
mod config;
mod drafts;
mod notify;
mod realtime;
mod sync;

use api::{ApiClient, HttpBackend};
use config::Config;
use drafts::DraftStore;
use notify::{Notification, Notifier, StderrNotifier};
use realtime::RealtimeClient;
use sync::{Record, Scope, SyncedCollection};

const LEAD_DRAFT: &str = "lead";

#[derive(Parser)]
#[command(name = "crm")]
#[command(about = "Command-line client for the CRM server")]
#[command(version)]
struct Cli {
    /// Server URL (overrides config)
    #[arg(long)]
    server: Option<String>,

    /// Auth token (overrides config)
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account, either with a new company or an invitation token
    Register {
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
        /// Create a new company and become its admin
        #[arg(long, conflicts_with = "invitation")]
        company: Option<String>,
        /// Join the company that invited you
        #[arg(long)]
        invitation: Option<String>,
    },
    /// Login to the CRM server
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Logout from the CRM server
    Logout,
    /// Show current login status
    Whoami,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Work with leads
    Leads {
        #[command(subcommand)]
        action: LeadsAction,
    },
    /// Work with appointments
    Appointments {
        #[command(subcommand)]
        action: AppointmentsAction,
    },
    /// Inspect schedule blocks
    Blocks {
        #[command(subcommand)]
        action: BlocksAction,
    },
    /// Show your effective permissions
    Permissions,
    /// Invite a user into your company
    Invite {
        email: String,
        #[arg(long)]
        role: Uuid,
        /// Email the invitation link
        #[arg(long)]
        send_email: bool,
        /// Base URL the invitation link points to
        #[arg(long)]
        redirect_to: Option<String>,
        /// Create the account directly with this password
        #[arg(long)]
        password: Option<String>,
    },
    /// Follow a collection live until interrupted
    Watch {
        #[arg(value_enum)]
        collection: WatchTarget,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a configuration value
    Set {
        /// Configuration key (server, token)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },
    /// Show all configuration
    Show,
    /// Get the config file path
    Path,
}

#[derive(Subcommand)]
enum LeadsAction {
    /// List the leads visible to you
    List,
    /// Create a lead; unsent input is kept as a draft
    Add {
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        assign: Option<Uuid>,
        /// Start from the last unsent draft
        #[arg(long)]
        resume: bool,
    },
    /// Assign a lead, or unassign it when no user is given
    Assign { id: Uuid, user: Option<Uuid> },
    /// Delete a lead
    Rm { id: Uuid },
}

#[derive(Subcommand)]
enum AppointmentsAction {
    /// List the appointments visible to you
    List,
    /// Book an appointment; refused when the slot is blocked
    Add {
        /// YYYY-MM-DD
        date: NaiveDate,
        /// HH:MM
        #[arg(value_parser = parse_time)]
        time: NaiveTime,
        /// Minutes
        #[arg(long, default_value_t = 30)]
        duration: i64,
        #[arg(long)]
        lead: Option<Uuid>,
        #[arg(long)]
        assign: Option<Uuid>,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand)]
enum BlocksAction {
    /// List schedule blocks in your company
    List {
        #[arg(long)]
        user: Option<Uuid>,
    },
    /// Check whether a slot is blocked for a user
    Check {
        user: Uuid,
        date: NaiveDate,
        #[arg(long, value_parser = parse_time)]
        time: Option<NaiveTime>,
        #[arg(long, default_value_t = 30)]
        duration: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum WatchTarget {
    Leads,
    Appointments,
    Meetings,
    Blocks,
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| format!("invalid time {}: {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crm_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_default();
    let server = cli.server.clone().unwrap_or_else(|| config.server());
    let token = cli.token.clone().or_else(|| config.remote.token.clone());

    match cli.command {
        Commands::Config { action } => handle_config_command(action),
        Commands::Register {
            email,
            password,
            name,
            company,
            invitation,
        } => {
            let req = RegisterRequest {
                email,
                password,
                full_name: name,
                company_name: company,
                invitation_token: invitation,
            };
            let auth = ApiClient::new(&server, None).register(&req).await?;
            save_token(auth.token)?;
            println!("\x1b[1;32mAccount created\x1b[0m");
            println!("\x1b[90mUser ID: {}\x1b[0m", auth.user_id);
            Ok(())
        }
        Commands::Login { email, password } => {
            let auth = ApiClient::new(&server, None).login(&email, &password).await?;
            save_token(auth.token)?;
            println!("\x1b[1;32mLogin successful!\x1b[0m");
            println!("\x1b[90mUser ID: {}\x1b[0m", auth.user_id);
            Ok(())
        }
        Commands::Logout => {
            let mut config = Config::load().unwrap_or_default();
            config.remote.token = None;
            config.save()?;
            println!("\x1b[32mLogged out successfully\x1b[0m");
            Ok(())
        }
        Commands::Whoami => {
            let Some(token) = token else {
                println!("\x1b[33mNot logged in\x1b[0m");
                println!("Run '\x1b[1mcrm login\x1b[0m' to authenticate");
                return Ok(());
            };
            let me = ApiClient::new(&server, Some(token)).me().await?;
            println!("\x1b[32mLogged in\x1b[0m as {} <{}>", me.profile.full_name, me.profile.email);
            println!("Server: {}", server);
            println!("Role: {}", me.role_name.as_deref().unwrap_or("-"));
            match me.company {
                Some(company) => println!("Company: {} ({})", company.name, company.id),
                None => println!("Company: -"),
            }
            Ok(())
        }
        command => {
            let Some(token) = token else {
                eprintln!("\x1b[33mNot logged in.\x1b[0m");
                eprintln!("   Run '\x1b[1mcrm login\x1b[0m' to authenticate.");
                return Ok(());
            };
            let session = Session::open(&server, token).await?;
            session.run(command).await
        }
    }
}

fn save_token(token: String) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    config.remote.token = Some(token);
    config.save()
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            let mut config = Config::load().unwrap_or_default();
            match key.as_str() {
                "server" => config.remote.server = Some(value),
                "token" => config.remote.token = Some(value),
                _ => bail!("Unknown config key: {}. Valid keys: server, token", key),
            }
            config.save()?;
            println!("Configuration saved");
        }
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = match key.as_str() {
                "server" => config.server(),
                "token" => config.remote.token.map(|_| "****").unwrap_or_default().to_string(),
                _ => bail!("Unknown config key: {}", key),
            };
            println!("{}", value);
        }
        ConfigAction::Show => {
            let config = Config::load()?;
            println!("server: {}", config.server());
            println!("token: {}", config.remote.token.map(|_| "****").unwrap_or_default());
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// An authenticated caller and the context its views are scoped to
struct Session {
    server: String,
    api: ApiClient,
    scope: Scope,
    notifier: Arc<dyn Notifier>,
}

impl Session {
    async fn open(server: &str, token: String) -> Result<Self> {
        let api = ApiClient::new(server, Some(token));
        let me = api.me().await.context("Failed to load your profile")?;
        if me.profile.company_id.is_none() {
            tracing::warn!("Your account is not attached to a company yet");
        }
        Ok(Self {
            server: server.to_string(),
            scope: Scope {
                user_id: me.profile.id,
                company_id: me.profile.company_id,
                role_name: me.role_name.unwrap_or_default(),
            },
            api,
            notifier: Arc::new(StderrNotifier),
        })
    }

    /// A collection backed by plain HTTP, for one-shot commands
    async fn collection<T: Record>(&self) -> SyncedCollection<T, HttpBackend> {
        let backend = Arc::new(HttpBackend::new(self.api.clone(), None));
        let collection = SyncedCollection::new(backend, self.notifier.clone(), self.scope.clone());
        collection.fetch().await;
        collection
    }

    async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Leads { action } => self.leads(action).await,
            Commands::Appointments { action } => self.appointments(action).await,
            Commands::Blocks { action } => self.blocks(action).await,
            Commands::Permissions => {
                let permissions = self.api.permissions().await?;
                println!("Role: {}", permissions.role_name.as_deref().unwrap_or("-"));
                for (module, action, allowed) in permissions.map.iter() {
                    let mark = if allowed { "\x1b[32m✓\x1b[0m" } else { "\x1b[31m✗\x1b[0m" };
                    println!("  {} {}.{}", mark, module, action);
                }
                Ok(())
            }
            Commands::Invite {
                email,
                role,
                send_email,
                redirect_to,
                password,
            } => {
                let req = InviteUserRequest {
                    email,
                    role_id: role,
                    send_email: Some(send_email),
                    redirect_to,
                    create_with_password: Some(password.is_some()),
                    password,
                };
                let resp = self.api.invite_user(&req).await?;
                self.notifier.notify(Notification::success(resp.message));
                if let Some(user_id) = resp.user_id {
                    println!("User ID: {}", user_id);
                }
                if let Some(invitation) = resp.invitation {
                    println!(
                        "Invitation {} expires {}",
                        invitation.id,
                        invitation.expires_at.format("%Y-%m-%d %H:%M")
                    );
                }
                Ok(())
            }
            Commands::Watch { collection } => match collection {
                WatchTarget::Leads => self.watch::<Lead>(print_lead).await,
                WatchTarget::Appointments => self.watch::<AppointmentDetails>(print_appointment).await,
                WatchTarget::Meetings => self.watch::<MeetingDetails>(print_meeting).await,
                WatchTarget::Blocks => self.watch::<ScheduleBlock>(print_block).await,
            },
            Commands::Register { .. }
            | Commands::Login { .. }
            | Commands::Logout
            | Commands::Whoami
            | Commands::Config { .. } => bail!("This command does not take a session"),
        }
    }

    async fn leads(&self, action: LeadsAction) -> Result<()> {
        let leads = self.collection::<Lead>().await;
        match action {
            LeadsAction::List => {
                let state = leads.snapshot();
                if let Some(error) = state.error {
                    bail!(error);
                }
                state.records.iter().for_each(print_lead);
            }
            LeadsAction::Add {
                name,
                email,
                phone,
                source,
                notes,
                assign,
                resume,
            } => {
                let drafts = DraftStore::new(Config::drafts_dir()?);
                let mut draft: NewLead = if resume {
                    drafts.load_or_default(LEAD_DRAFT)
                } else {
                    NewLead::default()
                };
                if let Some(name) = name {
                    draft.name = name;
                }
                draft.email = email.or(draft.email);
                draft.phone = phone.or(draft.phone);
                draft.source = source.or(draft.source);
                draft.notes = notes.or(draft.notes);
                draft.assigned_to = assign.or(draft.assigned_to);
                if draft.name.trim().is_empty() {
                    bail!("A lead needs a name");
                }

                drafts.save(LEAD_DRAFT, &draft)?;
                match leads.create(&draft).await {
                    Ok(lead) => {
                        drafts.clear(LEAD_DRAFT);
                        self.notifier.notify(Notification::success(format!("Lead {} created", lead.name)));
                        print_lead(&lead);
                    }
                    Err(e) => {
                        eprintln!("Draft kept; retry with 'crm leads add --resume'");
                        return Err(e.into());
                    }
                }
            }
            LeadsAction::Assign { id, user } => {
                let patch = LeadPatch {
                    assigned_to: Some(user),
                    ..Default::default()
                };
                let lead = leads.update(id, &patch).await?;
                print_lead(&lead);
            }
            LeadsAction::Rm { id } => {
                leads.delete(id).await?;
                self.notifier.notify(Notification::success("Lead deleted"));
            }
        }
        Ok(())
    }

    async fn appointments(&self, action: AppointmentsAction) -> Result<()> {
        let appointments = self.collection::<AppointmentDetails>().await;
        match action {
            AppointmentsAction::List => {
                let state = appointments.snapshot();
                if let Some(error) = state.error {
                    bail!(error);
                }
                state.records.iter().for_each(print_appointment);
            }
            AppointmentsAction::Add {
                date,
                time,
                duration,
                lead,
                assign,
                notes,
            } => {
                let req = NewAppointment {
                    lead_id: lead,
                    assigned_to: Some(assign.unwrap_or(self.scope.user_id)),
                    date,
                    time,
                    duration,
                    notes,
                };
                let appointment = appointments.create(&req).await?;
                self.notifier.notify(Notification::success("Appointment booked"));
                print_appointment(&appointment);
            }
        }
        Ok(())
    }

    async fn blocks(&self, action: BlocksAction) -> Result<()> {
        match action {
            BlocksAction::List { user } => {
                let blocks = self.collection::<ScheduleBlock>().await;
                let state = blocks.snapshot();
                if let Some(error) = state.error {
                    bail!(error);
                }
                state
                    .records
                    .iter()
                    .filter(|b| user.map_or(true, |u| b.user_id == u))
                    .for_each(print_block);
            }
            BlocksAction::Check {
                user,
                date,
                time,
                duration,
            } => {
                let resp = self
                    .api
                    .check_block(&BlockCheckRequest {
                        user_id: user,
                        date,
                        time,
                        duration,
                    })
                    .await?;
                match resp.block_id {
                    Some(block) if resp.blocked => println!("\x1b[31mBlocked\x1b[0m by {}", block),
                    _ => println!("\x1b[32mFree\x1b[0m"),
                }
            }
        }
        Ok(())
    }

    /// Print the collection whenever it changes, until Ctrl+C
    async fn watch<T: Record>(&self, print: fn(&T)) -> Result<()> {
        let token = self.api.token().unwrap_or_default().to_string();
        let realtime = Arc::new(RealtimeClient::connect(&self.server, &token).await?);
        let user_id = realtime.user_id();
        if user_id != self.scope.user_id {
            tracing::warn!("Realtime session is {} but the saved login is {}", user_id, self.scope.user_id);
        }
        let backend = Arc::new(HttpBackend::new(self.api.clone(), Some(realtime)));
        let collection: SyncedCollection<T, HttpBackend> =
            SyncedCollection::new(backend, self.notifier.clone(), self.scope.clone());
        collection.start().await?;
        self.notifier
            .notify(Notification::info(format!("Watching {} as {} (Ctrl+C to stop)", T::TABLE, user_id)));

        let mut states = WatchStream::new(collection.watch());
        loop {
            tokio::select! {
                state = states.next() => {
                    let Some(state) = state else { break };
                    if state.loading || state.is_updating {
                        continue;
                    }
                    println!("\x1b[1;36m── {} ({}) ──\x1b[0m", T::TABLE, state.records.len());
                    state.records.iter().for_each(print);
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        collection.close().await;
        Ok(())
    }
}

fn print_lead(lead: &Lead) {
    println!(
        "{}  {:<24} {:<10} {}",
        lead.id,
        lead.name,
        lead.status,
        lead.assigned_to.map(|u| u.to_string()).unwrap_or_else(|| "-".to_string())
    );
}

fn print_appointment(details: &AppointmentDetails) {
    let a = &details.appointment;
    println!(
        "{}  {} {} {:>3}m  {:<20} {}",
        a.id,
        a.date,
        a.time.format("%H:%M"),
        a.duration,
        details.lead_name.as_deref().unwrap_or("-"),
        details.assignee_name.as_deref().unwrap_or("-")
    );
}

fn print_meeting(details: &MeetingDetails) {
    let m = &details.meeting;
    println!(
        "{}  {} {} {:>3}m  {} ({} participants)",
        m.id,
        m.date,
        m.time.format("%H:%M"),
        m.duration,
        m.title,
        details.participants.len()
    );
}

fn print_block(block: &ScheduleBlock) {
    let window = match (block.start_time, block.end_time) {
        (Some(start), Some(end)) => format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")),
        _ => "all day".to_string(),
    };
    let until = block.end_date.map(|d| format!(" to {}", d)).unwrap_or_default();
    println!(
        "{}  {}  {}{} {}  {}",
        block.id,
        block.user_id,
        block.start_date,
        until,
        window,
        block.reason.as_deref().unwrap_or("")
    );
}
