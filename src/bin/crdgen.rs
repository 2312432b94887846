use kube::CustomResourceExt;
use ngrok_operator::crd::{Domain, HttpsEdge, IpPolicy, NgrokModuleSet, NgrokTrafficPolicy, TcpEdge, TlsEdge, Tunnel};

fn main() -> anyhow::Result<()> {
    let crds = [
        Domain::crd(),
        HttpsEdge::crd(),
        TlsEdge::crd(),
        TcpEdge::crd(),
        Tunnel::crd(),
        IpPolicy::crd(),
        NgrokModuleSet::crd(),
        NgrokTrafficPolicy::crd(),
    ];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
