mod tui_app;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use tokio::sync::oneshot;
use tui_app::{
    format_elapsed, format_price, stage_ratio, truncate, AppState, ConnectionStatus, Phase, RunForm,
    RunResponse,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build HTTP client");

    let mut app = AppState::new(base_url, RunForm::from_env());

    // Submit before rendering so the first frame already shows the run id
    let (result_tx, mut result_rx) = oneshot::channel::<Result<RunResponse, String>>();
    if let Some(run_id) = app.start(&client).await {
        // runs take minutes; no request timeout on the execute call
        let long_client = reqwest::Client::new();
        let base_url = app.base_url.clone();
        let body = app.form.body();
        tokio::spawn(async move {
            let outcome = tui_app::execute(&long_client, &base_url, &run_id, &body).await;
            let _ = result_tx.send(outcome);
        });
    }

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &client, &mut result_rx).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    result_rx: &mut oneshot::Receiver<Result<RunResponse, String>>,
) -> io::Result<()> {
    let poll_interval = Duration::from_secs(1);
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app))?;

        let timeout = poll_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc = key.code {
                        return Ok(());
                    }
                }
            }
        }

        if matches!(app.phase, Phase::Running) {
            match result_rx.try_recv() {
                Ok(outcome) => app.finish(outcome),
                Err(oneshot::error::TryRecvError::Closed) => {
                    app.finish(Err("run request ended without a response".to_string()))
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }

        if last_tick.elapsed() >= poll_interval {
            app.poll(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    match &app.phase {
        Phase::Submitting | Phase::Running => render_progress(f, app, chunks[1]),
        Phase::Done(result) => render_result(f, result, chunks[1]),
        Phase::Failed { kind, message } => render_failure(f, kind, message, chunks[1]),
    }
    render_footer(f, chunks[2]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let run_label = app
        .run_id
        .as_deref()
        .map_or("no run".to_string(), |id| format!("run {}", truncate(id, 13)));

    let title_spans = vec![
        Span::styled(
            " Resale Price Forecast  ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(truncate(&app.form.label(), 30), Style::default().fg(Color::White)),
        Span::raw("  │  "),
        Span::styled(
            format!("{} in {} days", app.form.speed_mode, app.form.target_days),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(run_label, Style::default().fg(Color::DarkGray)),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans))
        .block(Block::default().borders(Borders::ALL).border_style(
            Style::default().fg(Color::DarkGray),
        ));

    f.render_widget(paragraph, area);
}

fn render_progress(f: &mut Frame, app: &AppState, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let p = &app.progress;
    let step_label = if p.total > 0 {
        format!("{} {}/{}", p.stage, p.step, p.total)
    } else {
        p.stage.clone()
    };
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(Span::styled(
                    " PROGRESS ",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )),
        )
        .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
        .ratio(stage_ratio(&p.stage, p.step, p.total).clamp(0.0, 1.0))
        .label(step_label);
    f.render_widget(gauge, rows[0]);

    let message = p.message.clone().unwrap_or_else(|| "Waiting for the service…".to_string());
    let detail = Paragraph::new(vec![
        Line::from(Span::styled(message, Style::default().fg(Color::White))),
        Line::from(Span::styled(
            format!("elapsed {}", format_elapsed(app.started.elapsed())),
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .wrap(Wrap { trim: true })
    .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::DarkGray)));
    f.render_widget(detail, rows[1]);
}

fn render_result(f: &mut Frame, r: &RunResponse, area: Rect) {
    let price_color = if r.valid { Color::Green } else { Color::Red };
    let label_style = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);

    let mut rows = vec![
        Row::new(vec![
            Cell::from("Predicted price").style(label_style),
            Cell::from(format_price(r.predicted_price)).style(Style::default().fg(price_color)),
        ]),
        Row::new(vec![
            Cell::from("Horizon").style(label_style),
            Cell::from(format!("{} days", r.target_days)),
        ]),
        Row::new(vec![
            Cell::from("Listings used").style(label_style),
            Cell::from(r.data_points.to_string()),
        ]),
        Row::new(vec![
            Cell::from("MAE").style(label_style),
            Cell::from(format_price(r.model_accuracy_mae)),
        ]),
        Row::new(vec![
            Cell::from("Price range").style(label_style),
            Cell::from(format!(
                "{} – {}",
                format_price(r.price_stats.min),
                format_price(r.price_stats.max)
            )),
        ]),
        Row::new(vec![
            Cell::from("Mean / median").style(label_style),
            Cell::from(format!(
                "{} / {}",
                format_price(r.price_stats.mean),
                format_price(r.price_stats.median)
            )),
        ]),
        Row::new(vec![
            Cell::from("Weighted mean / median").style(label_style),
            Cell::from(format!(
                "{} / {}",
                format_price(r.price_stats.weighted_mean),
                format_price(r.price_stats.weighted_median)
            )),
        ]),
        Row::new(vec![
            Cell::from("Listing age").style(label_style),
            Cell::from(format!(
                "{}–{} days (avg {:.1})",
                r.time_stats.min_days, r.time_stats.max_days, r.time_stats.avg_days
            )),
        ]),
        Row::new(vec![
            Cell::from("Avg relevance").style(label_style),
            Cell::from(format!("{:.3}", r.avg_relevance)),
        ]),
        Row::new(vec![
            Cell::from("Confidence").style(label_style),
            Cell::from(format!("{:.0}%", r.confidence * 100.0)),
        ]),
        Row::new(vec![
            Cell::from("Predictor").style(label_style),
            Cell::from(r.variant.clone()),
        ]),
    ];
    if let Some(rec) = &r.recommendation {
        rows.push(Row::new(vec![
            Cell::from("Recommendation").style(label_style),
            Cell::from(rec.clone()).style(Style::default().fg(Color::Cyan)),
        ]));
    }
    if let Some(note) = &r.note {
        rows.push(Row::new(vec![
            Cell::from("Note").style(label_style),
            Cell::from(note.clone()).style(Style::default().fg(Color::DarkGray)),
        ]));
    }

    let table = Table::new(rows, [Constraint::Length(24), Constraint::Min(10)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " PREDICTION ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    );
    f.render_widget(table, area);
}

fn render_failure(f: &mut Frame, kind: &str, message: &str, area: Rect) {
    let paragraph = Paragraph::new(vec![
        Line::from(Span::styled(
            kind.to_string(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(message.to_string(), Style::default().fg(Color::White))),
    ])
    .wrap(Wrap { trim: true })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red))
            .title(Span::styled(
                " RUN FAILED ",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )),
    );
    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("progress poll: 1s", Style::default().fg(Color::DarkGray)),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
