use std::time::Duration;

use async_trait::async_trait;
use kestrel::kestrel_api::{ActorResult, Pid, Started};
use kestrel::{logging, ActorConfig, Context, Engine, EngineConfig, Receiver};
use tokio::sync::mpsc;

const ROUNDS: u32 = 5;

// Define messages
#[derive(Debug, Clone, Copy)]
struct Ping(u32);

#[derive(Debug, Clone, Copy)]
struct Pong(u32);

#[derive(Debug)]
struct GetCount;

#[derive(Debug)]
struct Count(u32);

// Answers every ping and keeps a tally.
struct PongActor {
    count: u32,
}

#[async_trait]
impl Receiver for PongActor {
    async fn receive(&mut self, ctx: &mut Context) -> ActorResult<()> {
        if let Some(Ping(n)) = ctx.message_as::<Ping>().copied() {
            println!("PongActor received Ping({n})");
            self.count += 1;
            ctx.respond(Pong(n)).await?;
        } else if ctx.message_as::<GetCount>().is_some() {
            ctx.respond(Count(self.count)).await?;
        }
        Ok(())
    }
}

// Opens the rally once started and reports when it is over.
struct PingActor {
    pong: Pid,
    finished: mpsc::UnboundedSender<u32>,
}

#[async_trait]
impl Receiver for PingActor {
    async fn receive(&mut self, ctx: &mut Context) -> ActorResult<()> {
        if ctx.message_as::<Started>().is_some() {
            ctx.send(&self.pong, Ping(1)).await?;
        } else if let Some(Pong(n)) = ctx.message_as::<Pong>().copied() {
            println!("PingActor received Pong({n})");
            if n < ROUNDS {
                ctx.send(&self.pong, Ping(n + 1)).await?;
            } else {
                let _ = self.finished.send(n);
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_development();

    let engine = Engine::new(EngineConfig::default())?;

    let pong = engine.spawn(|| PongActor { count: 0 }, "pong", ActorConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let target = pong.clone();
    let ping = engine.spawn(
        move || PingActor {
            pong: target.clone(),
            finished: tx.clone(),
        },
        "ping",
        ActorConfig::default(),
    );

    if let Some(rounds) = rx.recv().await {
        println!("rally finished after {rounds} rounds");
    }

    let count = engine
        .request(&pong, GetCount, Duration::from_secs(1))
        .await
        .result_as::<Count>()
        .await?;
    println!("PongActor answered {} pings", count.0);

    engine.poison(&ping).await.done().await;
    engine.poison(&pong).await.done().await;

    Ok(())
}
